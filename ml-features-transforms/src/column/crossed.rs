use std::sync::Arc;

use ml_features_core::{ops, Combiner, DenseTensor, Graph, SparseTensor, Tensor, Variable};
use ml_features_readers::ParseSpec;

use super::{join_keys, sparse_weighted_sum, FeatureColumn, WeightOptions};
use crate::error::{Error, Result};
use crate::transformer::Transformer;

/// Conjunction of several id-producing columns, hashed into one id space
#[derive(Debug, Clone)]
pub struct CrossedColumn {
    columns: Vec<Arc<dyn FeatureColumn>>,
    hash_bucket_size: usize,
    combiner: Combiner,
}

impl CrossedColumn {
    /// Cross `columns`, which must be at least two crossable columns
    pub fn new(mut columns: Vec<Arc<dyn FeatureColumn>>, hash_bucket_size: usize) -> Result<Self> {
        if columns.len() < 2 {
            return Err(Error::InvalidColumn(format!(
                "a cross needs at least two columns, got [{}]",
                join_keys(&columns)
            )));
        }
        if let Some(column) = columns.iter().find(|c| !c.can_cross()) {
            return Err(Error::InvalidColumn(format!(
                "{} cannot be crossed; use sparse, bucketized or crossed columns",
                column.name()
            )));
        }
        if hash_bucket_size < 2 {
            return Err(Error::InvalidColumn(format!(
                "hash_bucket_size must be at least 2, got {hash_bucket_size}"
            )));
        }

        columns.sort_by_key(|c| c.key());
        Ok(Self {
            columns,
            hash_bucket_size,
            combiner: Combiner::Sum,
        })
    }

    /// Set the combiner used when several crossed ids of one example are weighted
    #[must_use]
    pub fn with_combiner(mut self, combiner: Combiner) -> Self {
        self.combiner = combiner;
        self
    }

    /// Component columns, sorted by key
    pub fn columns(&self) -> &[Arc<dyn FeatureColumn>] {
        &self.columns
    }
}

impl FeatureColumn for CrossedColumn {
    fn name(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join("_X_")
    }

    fn key(&self) -> String {
        format!(
            "CrossedColumn(columns=[{}], hash_bucket_size={}, combiner={:?})",
            join_keys(&self.columns),
            self.hash_bucket_size,
            self.combiner
        )
    }

    fn add_parse_spec(&self, specs: &mut ParseSpec) -> Result<()> {
        for column in &self.columns {
            column.add_parse_spec(specs)?;
        }
        Ok(())
    }

    fn insert_transformed_feature(&self, transformer: &mut Transformer<'_>) -> Result<()> {
        let mut inputs = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let transformed = transformer.transform(column.as_ref())?;
            inputs.push(column.sparse_ids(&transformed)?);
        }

        let inputs = inputs.iter().collect::<Vec<_>>();
        let crossed = ops::sparse_feature_cross(&inputs, self.hash_bucket_size as u64)?;
        transformer.graph().record_op("SparseFeatureCross");
        transformer.insert(self, crossed);
        Ok(())
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
        Some(self.hash_bucket_size)
    }

    fn sparse_ids(&self, transformed: &Tensor) -> Result<SparseTensor> {
        Ok(transformed.as_sparse()?.clone())
    }

    fn can_cross(&self) -> bool {
        true
    }

    fn combiner(&self) -> Combiner {
        self.combiner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{BucketizedColumn, RealValuedColumn, SparseColumn};
    use crate::transformer::ColumnsToTensors;

    fn age_bucket() -> Arc<dyn FeatureColumn> {
        Arc::new(
            BucketizedColumn::new(RealValuedColumn::scalar("age"), vec![18.0, 21.0, 30.0]).unwrap(),
        )
    }

    fn query_word() -> Arc<dyn FeatureColumn> {
        Arc::new(SparseColumn::with_hash_bucket("query_word", 1000).unwrap())
    }

    #[test]
    fn test_components_sorted_by_key() {
        let a = CrossedColumn::new(vec![age_bucket(), query_word()], 1000).unwrap();
        let b = CrossedColumn::new(vec![query_word(), age_bucket()], 1000).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.name(), "age_bucketized_X_query_word");
    }

    #[test]
    fn test_cross_row_counts() {
        let cross = CrossedColumn::new(vec![age_bucket(), query_word()], 1000).unwrap();
        let mut mapping = ColumnsToTensors::new()
            .with_raw(
                "age",
                DenseTensor::from_vec(vec![20.0f32, 40.0], vec![2, 1]).unwrap(),
            )
            .with_raw(
                "query_word",
                SparseTensor::from_rows(vec![
                    vec!["a".to_string(), "b".to_string()],
                    vec![],
                ])
                .unwrap(),
            );
        let mut graph = Graph::default();

        let crossed = Transformer::new(&mut mapping, &mut graph)
            .transform(&cross)
            .unwrap();
        let crossed = crossed.as_sparse().unwrap();

        assert_eq!(crossed.row_entries().iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 0]);
        assert!(crossed
            .values()
            .as_i64()
            .unwrap()
            .iter()
            .all(|id| (0..1000).contains(id)));
        assert_eq!(graph.op_count("SparseFeatureCross"), 1);
    }

    #[test]
    fn test_invalid_crosses() {
        assert!(CrossedColumn::new(vec![query_word()], 10).is_err());
        let age: Arc<dyn FeatureColumn> = Arc::new(RealValuedColumn::scalar("age"));
        assert!(CrossedColumn::new(vec![age, query_word()], 10).is_err());
        assert!(CrossedColumn::new(vec![age_bucket(), query_word()], 1).is_err());
    }
}
