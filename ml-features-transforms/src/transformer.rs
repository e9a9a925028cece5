//! Memoized materialization of feature columns into tensors
//!
//! Some columns are consumed in more than one place: a bucketized column may
//! feed a layer by itself and also be part of a cross. The [`Transformer`]
//! makes sure the bucketization runs once, by recording every transformed
//! column in the shared [`ColumnsToTensors`] mapping and answering later
//! requests from it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use ml_features_core::{Graph, Tensor};

use crate::column::FeatureColumn;
use crate::error::{Error, Result};

/// Key of one entry in a [`ColumnsToTensors`] mapping
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TensorKey {
    /// A base (untransformed) input field, by name
    Raw(String),
    /// A transformed feature column, by column key
    Column(String),
}

impl fmt::Display for TensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorKey::Raw(name) => write!(f, "{name}"),
            TensorKey::Column(key) => write!(f, "{key}"),
        }
    }
}

/// Mapping from raw input names and feature columns to their tensors.
///
/// Entries are never overwritten: the first tensor stored under a key stays
/// authoritative for the lifetime of the mapping.
#[derive(Debug, Clone, Default)]
pub struct ColumnsToTensors {
    tensors: HashMap<TensorKey, Arc<Tensor>>,
}

impl ColumnsToTensors {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw input tensor, returning the mapping for chaining
    #[must_use]
    pub fn with_raw(mut self, name: &str, tensor: impl Into<Tensor>) -> Self {
        self.insert_raw(name, tensor);
        self
    }

    /// Add a raw input tensor. Returns `false` if the name was already present.
    pub fn insert_raw(&mut self, name: &str, tensor: impl Into<Tensor>) -> bool {
        self.try_insert(TensorKey::Raw(name.to_string()), Arc::new(tensor.into()))
    }

    /// Add a tensor that was already transformed for `column` upstream.
    ///
    /// Returns `false` if the column was already present.
    pub fn insert_column(&mut self, column: &dyn FeatureColumn, tensor: impl Into<Tensor>) -> bool {
        self.try_insert(TensorKey::Column(column.key()), Arc::new(tensor.into()))
    }

    fn try_insert(&mut self, key: TensorKey, tensor: Arc<Tensor>) -> bool {
        if self.tensors.contains_key(&key) {
            return false;
        }
        self.tensors.insert(key, tensor);
        true
    }

    /// Get a tensor by key
    pub fn get(&self, key: &TensorKey) -> Option<&Arc<Tensor>> {
        self.tensors.get(key)
    }

    /// Get a raw input tensor by name
    pub fn raw(&self, name: &str) -> Option<&Arc<Tensor>> {
        self.get(&TensorKey::Raw(name.to_string()))
    }

    /// Get the transformed tensor of a column
    pub fn column(&self, column: &dyn FeatureColumn) -> Option<&Arc<Tensor>> {
        self.get(&TensorKey::Column(column.key()))
    }

    /// Check if a key is present
    pub fn contains(&self, key: &TensorKey) -> bool {
        self.tensors.contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Check if the mapping has no entries
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Iterate over all entries in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&TensorKey, &Arc<Tensor>)> {
        self.tensors.iter()
    }
}

impl<S: Into<String>> FromIterator<(S, Tensor)> for ColumnsToTensors {
    fn from_iter<I: IntoIterator<Item = (S, Tensor)>>(iter: I) -> Self {
        let mut mapping = Self::new();
        for (name, tensor) in iter {
            mapping.try_insert(TensorKey::Raw(name.into()), Arc::new(tensor));
        }
        mapping
    }
}

/// Resolves feature columns to tensors, computing each at most once
pub struct Transformer<'a> {
    columns_to_tensors: &'a mut ColumnsToTensors,
    graph: &'a mut Graph,
}

impl<'a> Transformer<'a> {
    /// Create a transformer that reads from and writes into `columns_to_tensors`
    pub fn new(columns_to_tensors: &'a mut ColumnsToTensors, graph: &'a mut Graph) -> Self {
        Self {
            columns_to_tensors,
            graph,
        }
    }

    /// Return the tensor that represents `column`.
    ///
    /// A column already in the mapping is returned as is. Otherwise the column
    /// inserts its own transformed tensor, transforming any columns it depends
    /// on through this same transformer.
    pub fn transform(&mut self, column: &dyn FeatureColumn) -> Result<Arc<Tensor>> {
        let key = TensorKey::Column(column.key());
        info!("Transforming feature_column {}", key);
        if let Some(tensor) = self.columns_to_tensors.get(&key) {
            return Ok(Arc::clone(tensor));
        }

        column.insert_transformed_feature(self)?;

        self.columns_to_tensors
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::UnsupportedColumn(column.name()))
    }

    /// Get a raw input tensor by name
    pub fn raw_input(&self, name: &str) -> Result<Arc<Tensor>> {
        self.columns_to_tensors
            .raw(name)
            .cloned()
            .ok_or_else(|| Error::MissingInput(name.to_string()))
    }

    /// Store a freshly computed tensor for `column`.
    ///
    /// Returns the tensor held by the mapping, which is the earlier one if the
    /// column was already present.
    pub fn insert(&mut self, column: &dyn FeatureColumn, tensor: impl Into<Tensor>) -> Arc<Tensor> {
        self.insert_shared(column, Arc::new(tensor.into()))
    }

    /// Store an existing tensor for `column` without copying it
    pub fn insert_shared(&mut self, column: &dyn FeatureColumn, tensor: Arc<Tensor>) -> Arc<Tensor> {
        let key = TensorKey::Column(column.key());
        Arc::clone(self.columns_to_tensors.tensors.entry(key).or_insert(tensor))
    }

    /// Graph that records the ops run by transformations
    pub fn graph(&mut self) -> &mut Graph {
        &mut *self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{BucketizedColumn, CrossedColumn, RealValuedColumn, SparseColumn};
    use ml_features_core::{DenseTensor, SparseTensor};
    use ml_features_readers::ParseSpec;

    /// Column that never stores a tensor for itself
    #[derive(Debug)]
    struct SilentColumn;

    impl FeatureColumn for SilentColumn {
        fn name(&self) -> String {
            "silent".to_string()
        }

        fn key(&self) -> String {
            "SilentColumn()".to_string()
        }

        fn add_parse_spec(&self, _specs: &mut ParseSpec) -> Result<()> {
            Ok(())
        }

        fn insert_transformed_feature(&self, _transformer: &mut Transformer<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn raw_inputs() -> ColumnsToTensors {
        ColumnsToTensors::new()
            .with_raw(
                "age",
                DenseTensor::from_vec(vec![17.0f32, 25.0, 60.0], vec![3, 1]).unwrap(),
            )
            .with_raw(
                "query_word",
                SparseTensor::from_rows(vec![
                    vec!["rust".to_string()],
                    vec!["graph".to_string(), "tensor".to_string()],
                    vec![],
                ])
                .unwrap(),
            )
    }

    #[test]
    fn test_shared_columns_transformed_once() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let age_bucket: Arc<dyn FeatureColumn> = Arc::new(
            BucketizedColumn::new(RealValuedColumn::scalar("age"), vec![18.0, 21.0, 30.0]).unwrap(),
        );
        let query_word: Arc<dyn FeatureColumn> =
            Arc::new(SparseColumn::with_hash_bucket("query_word", 1000).unwrap());
        let cross =
            CrossedColumn::new(vec![Arc::clone(&age_bucket), Arc::clone(&query_word)], 1000).unwrap();

        let mut mapping = raw_inputs();
        let mut graph = Graph::default();
        let mut transformer = Transformer::new(&mut mapping, &mut graph);

        let crossed = transformer.transform(&cross).unwrap();
        let bucketized = transformer.transform(age_bucket.as_ref()).unwrap();
        let hashed = transformer.transform(query_word.as_ref()).unwrap();

        assert!(Arc::ptr_eq(&crossed, &transformer.transform(&cross).unwrap()));
        assert!(Arc::ptr_eq(&bucketized, &transformer.transform(age_bucket.as_ref()).unwrap()));
        assert!(Arc::ptr_eq(&hashed, &transformer.transform(query_word.as_ref()).unwrap()));

        assert_eq!(graph.op_count("Bucketize"), 1);
        assert_eq!(graph.op_count("StringToHashBucketFast"), 1);
        assert_eq!(graph.op_count("SparseFeatureCross"), 1);
        // raw age, raw query_word, age column, bucketized, hashed, cross
        assert_eq!(mapping.len(), 6);
    }

    #[test]
    fn test_upstream_tensor_is_authoritative() {
        let query_word = SparseColumn::with_hash_bucket("query_word", 1000).unwrap();
        let precomputed = SparseTensor::from_rows(vec![vec![7i64], vec![8], vec![]]).unwrap();

        let mut mapping = raw_inputs();
        assert!(mapping.insert_column(&query_word, precomputed.clone()));
        assert!(!mapping.insert_column(&query_word, SparseTensor::from_rows(vec![vec![1i64]]).unwrap()));

        let mut graph = Graph::default();
        let ids = Transformer::new(&mut mapping, &mut graph)
            .transform(&query_word)
            .unwrap();

        assert_eq!(ids.as_sparse().unwrap(), &precomputed);
        assert_eq!(graph.op_count("StringToHashBucketFast"), 0);
    }

    #[test]
    fn test_column_without_output_is_unsupported() {
        let mut mapping = raw_inputs();
        let mut graph = Graph::default();
        let err = Transformer::new(&mut mapping, &mut graph)
            .transform(&SilentColumn)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedColumn(name) if name == "silent"));
    }

    #[test]
    fn test_missing_raw_input() {
        let mut mapping = ColumnsToTensors::new();
        let mut graph = Graph::default();
        let err = Transformer::new(&mut mapping, &mut graph)
            .transform(&RealValuedColumn::scalar("age"))
            .unwrap_err();
        assert!(matches!(err, Error::MissingInput(name) if name == "age"));
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_raw_inputs_keep_first() {
        let mut mapping: ColumnsToTensors = vec![(
            "x",
            Tensor::from(DenseTensor::from_vec(vec![1.0f32], vec![1]).unwrap()),
        )]
        .into_iter()
        .collect();
        assert!(!mapping.insert_raw("x", DenseTensor::from_vec(vec![2.0f32], vec![1]).unwrap()));
        assert_eq!(
            mapping.raw("x").unwrap().as_dense().unwrap().as_f32_slice().unwrap(),
            &[1.0]
        );
    }
}
