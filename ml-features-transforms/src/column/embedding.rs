use std::sync::Arc;

use ml_features_core::{ops, Combiner, DenseTensor, Graph, InitializerConfig, Tensor};
use ml_features_readers::ParseSpec;

use super::{FeatureColumn, WeightOptions};
use crate::error::{Error, Result};
use crate::transformer::Transformer;

/// Dense, trainable representation of an id-producing column
#[derive(Debug, Clone)]
pub struct EmbeddingColumn {
    sparse_id_column: Arc<dyn FeatureColumn>,
    dimension: usize,
    combiner: Combiner,
    initializer: InitializerConfig,
}

impl EmbeddingColumn {
    /// Embed the ids of `sparse_id_column` into `dimension` floats.
    ///
    /// Rows are averaged per example and initialized from a truncated normal
    /// with standard deviation `1 / sqrt(dimension)`.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(sparse_id_column: Arc<dyn FeatureColumn>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidColumn(format!(
                "embedding dimension of {} must be at least 1",
                sparse_id_column.name()
            )));
        }
        if sparse_id_column.id_space().is_none() {
            return Err(Error::InvalidColumn(format!(
                "{} does not produce ids and cannot be embedded",
                sparse_id_column.name()
            )));
        }

        Ok(Self {
            sparse_id_column,
            dimension,
            combiner: Combiner::Mean,
            initializer: InitializerConfig::TruncatedNormal {
                mean: 0.0,
                stddev: 1.0 / (dimension as f32).sqrt(),
            },
        })
    }

    /// Set the combiner for examples with several ids
    #[must_use]
    pub fn with_combiner(mut self, combiner: Combiner) -> Self {
        self.combiner = combiner;
        self
    }

    /// Set the initializer of the embedding weights
    pub fn with_initializer(mut self, initializer: InitializerConfig) -> Result<Self> {
        initializer.build()?;
        self.initializer = initializer;
        Ok(self)
    }

    /// Column whose ids are embedded
    pub fn sparse_id_column(&self) -> &Arc<dyn FeatureColumn> {
        &self.sparse_id_column
    }

    /// Embedding width
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl FeatureColumn for EmbeddingColumn {
    fn name(&self) -> String {
        format!("{}_embedding", self.sparse_id_column.name())
    }

    fn key(&self) -> String {
        format!(
            "EmbeddingColumn(sparse_id_column={}, dimension={}, combiner={:?}, initializer={:?})",
            self.sparse_id_column.key(),
            self.dimension,
            self.combiner,
            self.initializer
        )
    }

    fn add_parse_spec(&self, specs: &mut ParseSpec) -> Result<()> {
        self.sparse_id_column.add_parse_spec(specs)
    }

    fn insert_transformed_feature(&self, transformer: &mut Transformer<'_>) -> Result<()> {
        let source = transformer.transform(self.sparse_id_column.as_ref())?;
        let ids = self.sparse_id_column.sparse_ids(&source)?;
        transformer.insert(self, ids);
        Ok(())
    }

    fn to_dnn_input_layer(
        &self,
        input: &Tensor,
        graph: &mut Graph,
        options: &WeightOptions<'_>,
    ) -> Result<DenseTensor> {
        let id_space = self
            .sparse_id_column
            .id_space()
            .ok_or_else(|| Error::UnsupportedInDnn(self.name()))?;
        let initializer = self.initializer.build()?;
        let weight = options.create_weight(
            graph,
            self,
            "weights",
            vec![id_space, self.dimension],
            initializer.as_ref(),
        )?;
        Ok(ops::embedding_lookup_sparse(
            weight.value(),
            input.as_sparse()?,
            self.combiner,
        )?)
    }

    fn combiner(&self) -> Combiner {
        self.combiner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{RealValuedColumn, SparseColumn};
    use crate::transformer::ColumnsToTensors;
    use ml_features_core::SparseTensor;

    fn query_embedding() -> EmbeddingColumn {
        let query_word = SparseColumn::with_hash_bucket("query_word", 100).unwrap();
        EmbeddingColumn::new(Arc::new(query_word), 8).unwrap()
    }

    #[test]
    fn test_embedding_lookup_width() {
        let column = query_embedding();
        let mut mapping = ColumnsToTensors::new().with_raw(
            "query_word",
            SparseTensor::from_rows(vec![
                vec!["rust".to_string(), "graph".to_string()],
                vec![],
                vec!["tensor".to_string()],
            ])
            .unwrap(),
        );
        let mut graph = Graph::default();

        let ids = Transformer::new(&mut mapping, &mut graph)
            .transform(&column)
            .unwrap();
        let options = WeightOptions {
            scope: "input_from_feature_columns",
            collections: None,
            trainable: false,
        };
        let output = column.to_dnn_input_layer(&ids, &mut graph, &options).unwrap();

        assert_eq!(output.shape(), &[3, 8]);
        assert!(output.as_f32_slice().unwrap()[8..16].iter().all(|&v| v == 0.0));

        let weight = graph
            .variable("input_from_feature_columns/query_word_embedding/weights")
            .unwrap();
        assert_eq!(weight.shape(), &[100, 8]);
        assert!(!weight.trainable());
        assert!(graph.trainable_variables().is_empty());
    }

    #[test]
    fn test_not_usable_in_linear_model() {
        let column = query_embedding();
        let ids: Tensor = SparseTensor::from_rows(vec![vec![1i64]]).unwrap().into();
        let options = WeightOptions {
            scope: "weighted_sum_from_feature_columns",
            collections: None,
            trainable: true,
        };
        assert!(matches!(
            column.to_weighted_sum(&ids, 1, &mut Graph::default(), &options),
            Err(Error::UnsupportedInLinear(_))
        ));
    }

    #[test]
    fn test_requires_id_column() {
        let age: Arc<dyn FeatureColumn> = Arc::new(RealValuedColumn::scalar("age"));
        assert!(EmbeddingColumn::new(age, 4).is_err());
        assert!(EmbeddingColumn::new(query_embedding().sparse_id_column().clone(), 0).is_err());
    }
}
