use std::sync::Arc;

use ml_features_core::{ops, DenseTensor, Graph, SparseTensor, Tensor, Variable};
use ml_features_readers::ParseSpec;

use super::{sparse_weighted_sum, FeatureColumn, RealValuedColumn, WeightOptions};
use crate::error::{Error, Result};
use crate::transformer::Transformer;

/// A real-valued column discretized by sorted boundaries.
///
/// With boundaries `[b0, b1, ..., bn]` every value falls into one of `n + 2`
/// buckets: `(-inf, b0)`, `[b0, b1)`, ..., `[bn, +inf)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketizedColumn {
    source: RealValuedColumn,
    boundaries: Vec<f32>,
}

impl BucketizedColumn {
    /// Bucketize `source` by `boundaries`, which must be strictly increasing
    pub fn new(source: RealValuedColumn, boundaries: Vec<f32>) -> Result<Self> {
        if boundaries.is_empty() {
            return Err(Error::InvalidColumn(format!(
                "boundaries of {} must not be empty",
                source.column_name()
            )));
        }
        if boundaries.iter().any(|b| !b.is_finite()) {
            return Err(Error::InvalidColumn(format!(
                "boundaries of {} must be finite, got {boundaries:?}",
                source.column_name()
            )));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidColumn(format!(
                "boundaries of {} must be sorted and unique, got {boundaries:?}",
                source.column_name()
            )));
        }

        Ok(Self { source, boundaries })
    }

    /// The column being bucketized
    pub fn source(&self) -> &RealValuedColumn {
        &self.source
    }

    /// Bucket boundaries
    pub fn boundaries(&self) -> &[f32] {
        &self.boundaries
    }

    fn num_buckets(&self) -> usize {
        self.boundaries.len() + 1
    }
}

impl FeatureColumn for BucketizedColumn {
    fn name(&self) -> String {
        format!("{}_bucketized", self.source.name())
    }

    fn key(&self) -> String {
        format!(
            "BucketizedColumn(source_column={}, boundaries={:?})",
            self.source.key(),
            self.boundaries
        )
    }

    fn add_parse_spec(&self, specs: &mut ParseSpec) -> Result<()> {
        self.source.add_parse_spec(specs)
    }

    fn insert_transformed_feature(&self, transformer: &mut Transformer<'_>) -> Result<()> {
        let source = transformer.transform(&self.source)?;
        let values = self.source.dense_input(&source)?;
        let buckets = ops::bucketize(&values, &self.boundaries)?;
        transformer.graph().record_op("Bucketize");
        transformer.insert(self, buckets);
        Ok(())
    }

    fn to_dnn_input_layer(
        &self,
        input: &Tensor,
        _graph: &mut Graph,
        _options: &WeightOptions<'_>,
    ) -> Result<DenseTensor> {
        Ok(ops::one_hot(input.as_dense()?, self.num_buckets())?)
    }

    fn to_weighted_sum(
        &self,
        input: &Tensor,
        num_outputs: usize,
        graph: &mut Graph,
        options: &WeightOptions<'_>,
    ) -> Result<(DenseTensor, Vec<Arc<Variable>>)> {
        sparse_weighted_sum(self, input, num_outputs, graph, options)
    }

    fn id_space(&self) -> Option<usize> {
        Some(self.source.dimension() * self.num_buckets())
    }

    // Bucket `k` of dimension `i` becomes id `i * num_buckets + k`.
    fn sparse_ids(&self, transformed: &Tensor) -> Result<SparseTensor> {
        let buckets = transformed.as_dense()?.flatten_rows()?;
        let width = buckets.shape()[1];
        let stride = i64::try_from(self.num_buckets())
            .map_err(|_| Error::InvalidColumn(format!("too many buckets in {}", self.name())))?;
        let rows = buckets
            .as_i64_slice()?
            .chunks(width.max(1))
            .map(|row| {
                row.iter()
                    .zip(0i64..)
                    .map(|(&bucket, i)| bucket + i * stride)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        Ok(SparseTensor::from_rows(rows)?)
    }

    fn can_cross(&self) -> bool {
        true
    }
}
