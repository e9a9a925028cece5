use std::sync::Arc;

use ml_features_core::initializer::ZerosInitializer;
use ml_features_core::{ops, DataType, DenseTensor, Graph, Tensor, Variable};
use ml_features_readers::{merge_spec, FeatureSpec, ParseSpec};

use super::{FeatureColumn, WeightOptions};
use crate::error::{Error, Result};
use crate::transformer::Transformer;

/// A dense numeric field with a fixed number of values per example
#[derive(Debug, Clone, PartialEq)]
pub struct RealValuedColumn {
    column_name: String,
    dimension: usize,
    dtype: DataType,
    default_value: Option<Vec<f64>>,
}

impl RealValuedColumn {
    /// Create a column of `dimension` values of type `dtype`
    pub fn new(column_name: &str, dimension: usize, dtype: DataType) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidColumn(format!(
                "dimension of {column_name} must be at least 1"
            )));
        }
        if !dtype.is_numeric() {
            return Err(Error::InvalidColumn(format!(
                "{column_name} must be an integer or floating column, got {dtype}"
            )));
        }

        Ok(Self {
            column_name: column_name.to_string(),
            dimension,
            dtype,
            default_value: None,
        })
    }

    /// Single-valued float column
    pub fn scalar(column_name: &str) -> Self {
        Self {
            column_name: column_name.to_string(),
            dimension: 1,
            dtype: DataType::Float32,
            default_value: None,
        }
    }

    /// Use `default_value` when an example lacks the field.
    ///
    /// A single value is broadcast to every dimension.
    pub fn with_default(mut self, default_value: Vec<f64>) -> Result<Self> {
        let default_value = match default_value.as_slice() {
            [value] => vec![*value; self.dimension],
            values if values.len() == self.dimension => default_value,
            values => {
                return Err(Error::InvalidColumn(format!(
                    "default value of {} has {} values, expected {}",
                    self.column_name,
                    values.len(),
                    self.dimension
                )))
            }
        };
        self.default_value = Some(default_value);
        Ok(self)
    }

    /// Name of the raw input field
    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    /// Number of values per example
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Element type
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Dense `[batch, dimension]` f32 view of the transformed tensor
    pub(crate) fn dense_input(&self, input: &Tensor) -> Result<DenseTensor> {
        let dense = input.as_dense()?;
        let batch = dense.batch_size();
        if dense.len() != batch * self.dimension {
            return Err(Error::Core(ml_features_core::Error::ShapeMismatch(format!(
                "{} expects {} values per example, got shape {:?}",
                self.column_name,
                self.dimension,
                dense.shape()
            ))));
        }
        Ok(dense.reshape(vec![batch, self.dimension])?.to_f32()?)
    }
}

impl FeatureColumn for RealValuedColumn {
    fn name(&self) -> String {
        self.column_name.clone()
    }

    fn key(&self) -> String {
        format!(
            "RealValuedColumn(column_name={}, dimension={}, dtype={}, default_value={:?})",
            self.column_name, self.dimension, self.dtype, self.default_value
        )
    }

    fn add_parse_spec(&self, specs: &mut ParseSpec) -> Result<()> {
        let spec = FeatureSpec::FixedLen {
            shape: vec![self.dimension],
            dtype: self.dtype,
            default_value: self.default_value.clone(),
        };
        Ok(merge_spec(specs, &self.column_name, spec)?)
    }

    fn insert_transformed_feature(&self, transformer: &mut Transformer<'_>) -> Result<()> {
        let input = transformer.raw_input(&self.column_name)?;
        if input.is_sparse() {
            return Err(Error::InvalidColumn(format!(
                "{} expects a dense input tensor",
                self.column_name
            )));
        }
        transformer.insert_shared(self, input);
        Ok(())
    }

    fn to_dnn_input_layer(
        &self,
        input: &Tensor,
        _graph: &mut Graph,
        _options: &WeightOptions<'_>,
    ) -> Result<DenseTensor> {
        self.dense_input(input)
    }

    fn to_weighted_sum(
        &self,
        input: &Tensor,
        num_outputs: usize,
        graph: &mut Graph,
        options: &WeightOptions<'_>,
    ) -> Result<(DenseTensor, Vec<Arc<Variable>>)> {
        let input = self.dense_input(input)?;
        let weight = options.create_weight(
            graph,
            self,
            "weight",
            vec![self.dimension, num_outputs],
            &ZerosInitializer,
        )?;
        let output = ops::matmul(&input, weight.value())?;
        Ok((output, vec![weight]))
    }
}
