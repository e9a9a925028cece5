use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ml_features_core::{ops, Combiner, DataType, DenseTensor, Graph, SparseTensor, Tensor, TensorData, Variable};
use ml_features_readers::{merge_spec, FeatureSpec, ParseSpec};

use super::{sparse_weighted_sum, FeatureColumn, WeightOptions};
use crate::error::{Error, Result};
use crate::transformer::Transformer;

fn default_oov_id() -> i64 {
    -1
}

/// How raw values of a sparse column become ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdMapping {
    /// Fingerprint every value into `[0, hash_bucket_size)`
    HashBucket {
        /// Number of hash buckets
        hash_bucket_size: usize,
    },
    /// Look values up in a fixed vocabulary
    Keys {
        /// Vocabulary; the id of a key is its position
        keys: Vec<String>,
        /// Id of out-of-vocabulary values. Negative ids are dropped.
        #[serde(default = "default_oov_id")]
        default_value: i64,
    },
    /// Integer values taken modulo `bucket_size`
    Integerized {
        /// Number of ids
        bucket_size: usize,
    },
}

impl IdMapping {
    fn id_space(&self) -> usize {
        match self {
            IdMapping::HashBucket { hash_bucket_size } => *hash_bucket_size,
            IdMapping::Keys { keys, .. } => keys.len(),
            IdMapping::Integerized { bucket_size } => *bucket_size,
        }
    }
}

impl fmt::Display for IdMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdMapping::HashBucket { hash_bucket_size } => {
                write!(f, "hash_bucket(size={hash_bucket_size})")
            }
            IdMapping::Keys {
                keys,
                default_value,
            } => write!(f, "keys({keys:?}, default_value={default_value})"),
            IdMapping::Integerized { bucket_size } => write!(f, "integerized(size={bucket_size})"),
        }
    }
}

/// A categorical field with any number of values per example, mapped to ids
#[derive(Debug, Clone, PartialEq)]
pub struct SparseColumn {
    column_name: String,
    id_mapping: IdMapping,
    combiner: Combiner,
    dtype: DataType,
}

impl SparseColumn {
    /// Create a sparse column, checking the mapping fits the value type
    pub fn new(column_name: &str, id_mapping: IdMapping, dtype: DataType) -> Result<Self> {
        let invalid = |message: String| Err(Error::InvalidColumn(format!("{column_name}: {message}")));
        match &id_mapping {
            IdMapping::HashBucket { hash_bucket_size } => {
                if *hash_bucket_size < 2 {
                    return invalid(format!(
                        "hash_bucket_size must be at least 2, got {hash_bucket_size}"
                    ));
                }
                if !(dtype == DataType::String || dtype.is_integer()) {
                    return invalid(format!("hashing supports string or integer values, got {dtype}"));
                }
            }
            IdMapping::Keys {
                keys,
                default_value,
            } => {
                if keys.is_empty() {
                    return invalid("keys must not be empty".to_string());
                }
                if usize::try_from(*default_value).is_ok_and(|d| d >= keys.len()) {
                    return invalid(format!(
                        "default_value {default_value} is outside the {} keys",
                        keys.len()
                    ));
                }
                if dtype != DataType::String {
                    return invalid(format!("keys lookup supports string values, got {dtype}"));
                }
            }
            IdMapping::Integerized { bucket_size } => {
                if *bucket_size == 0 {
                    return invalid("bucket_size must be at least 1".to_string());
                }
                if !dtype.is_integer() {
                    return invalid(format!("integerized features must be integers, got {dtype}"));
                }
            }
        }

        Ok(Self {
            column_name: column_name.to_string(),
            id_mapping,
            combiner: Combiner::Sum,
            dtype,
        })
    }

    /// String column hashed into `hash_bucket_size` buckets
    pub fn with_hash_bucket(column_name: &str, hash_bucket_size: usize) -> Result<Self> {
        Self::new(
            column_name,
            IdMapping::HashBucket { hash_bucket_size },
            DataType::String,
        )
    }

    /// String column looked up in a vocabulary, dropping unknown values
    pub fn with_keys<S: AsRef<str>>(column_name: &str, keys: &[S]) -> Result<Self> {
        Self::new(
            column_name,
            IdMapping::Keys {
                keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
                default_value: default_oov_id(),
            },
            DataType::String,
        )
    }

    /// Integer column whose values already are ids
    pub fn with_integerized_feature(column_name: &str, bucket_size: usize) -> Result<Self> {
        Self::new(
            column_name,
            IdMapping::Integerized { bucket_size },
            DataType::Int64,
        )
    }

    /// Set the combiner used when several ids of one example are weighted
    #[must_use]
    pub fn with_combiner(mut self, combiner: Combiner) -> Self {
        self.combiner = combiner;
        self
    }

    /// Name of the raw input field
    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    /// Id mapping
    pub fn id_mapping(&self) -> &IdMapping {
        &self.id_mapping
    }

    fn map_ids(&self, values: &SparseTensor, graph: &mut Graph) -> Result<SparseTensor> {
        match &self.id_mapping {
            IdMapping::HashBucket { hash_bucket_size } => {
                let strings = match values.values().as_strings() {
                    Some(strings) => strings.to_vec(),
                    None => (0..values.nnz())
                        .map(|i| values.values().value_to_string(i))
                        .collect::<ml_features_core::Result<Vec<_>>>()?,
                };
                let ids = ops::string_to_hash_bucket(&strings, *hash_bucket_size as u64)?;
                graph.record_op("StringToHashBucketFast");
                Ok(ops::sparse_ids_like(values, ids)?)
            }
            IdMapping::Keys {
                keys,
                default_value,
            } => {
                let table: HashMap<&str, i64> = keys.iter().map(String::as_str).zip(0i64..).collect();
                let strings = values.values().as_strings().ok_or(ml_features_core::Error::TypeMismatch {
                    expected: DataType::String,
                    actual: values.dtype(),
                })?;
                let ids = strings
                    .iter()
                    .map(|s| table.get(s.as_str()).copied().unwrap_or(*default_value))
                    .collect::<Vec<_>>();
                graph.record_op("HashTableLookup");
                let kept = ids
                    .iter()
                    .enumerate()
                    .filter(|(_, &id)| id >= 0)
                    .map(|(i, _)| i)
                    .collect::<Vec<_>>();
                Ok(ops::sparse_ids_like(values, ids)?.retain(&kept)?)
            }
            IdMapping::Integerized { bucket_size } => {
                let modulus = i64::try_from(*bucket_size)
                    .map_err(|_| Error::InvalidColumn(format!("{} bucket_size overflows", self.column_name)))?;
                let ids = values
                    .values()
                    .to_i64()?
                    .into_iter()
                    .map(|v| v.rem_euclid(modulus))
                    .collect();
                graph.record_op("Mod");
                Ok(ops::sparse_ids_like(values, ids)?)
            }
        }
    }
}

/// Sparse `[batch, width]` view of a raw input.
///
/// Dense inputs are laid out row by row; empty strings count as missing.
fn to_sparse_input(input: &Tensor) -> Result<SparseTensor> {
    let dense = match input {
        Tensor::Sparse(sparse) => return Ok(sparse.clone()),
        Tensor::Dense(dense) => dense.flatten_rows()?,
    };

    let (batch, width) = (dense.shape()[0], dense.shape()[1]);
    let indices = (0..batch)
        .flat_map(|row| (0..width).flat_map(move |col| [row, col]))
        .collect();
    let all = SparseTensor::from_coo(dense.data().clone(), indices, vec![batch, width])?;

    match dense.data() {
        TensorData::String(values) => {
            let present = values
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_empty())
                .map(|(i, _)| i)
                .collect::<Vec<_>>();
            Ok(all.retain(&present)?)
        }
        _ => Ok(all),
    }
}

impl FeatureColumn for SparseColumn {
    fn name(&self) -> String {
        self.column_name.clone()
    }

    fn key(&self) -> String {
        format!(
            "SparseColumn(column_name={}, id_mapping={}, combiner={:?}, dtype={})",
            self.column_name, self.id_mapping, self.combiner, self.dtype
        )
    }

    fn add_parse_spec(&self, specs: &mut ParseSpec) -> Result<()> {
        Ok(merge_spec(
            specs,
            &self.column_name,
            FeatureSpec::VarLen { dtype: self.dtype },
        )?)
    }

    fn insert_transformed_feature(&self, transformer: &mut Transformer<'_>) -> Result<()> {
        let input = transformer.raw_input(&self.column_name)?;
        let values = to_sparse_input(&input)?;
        let ids = self.map_ids(&values, transformer.graph())?;
        transformer.insert(self, ids);
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
        Some(self.id_mapping.id_space())
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
    use crate::transformer::ColumnsToTensors;

    fn transform(column: &SparseColumn, raw: Tensor) -> (Arc<Tensor>, Graph) {
        let mut mapping = ColumnsToTensors::new().with_raw(column.column_name(), raw);
        let mut graph = Graph::default();
        let tensor = Transformer::new(&mut mapping, &mut graph)
            .transform(column)
            .unwrap();
        (tensor, graph)
    }

    #[test]
    fn test_hash_bucket_ids_in_range() {
        let column = SparseColumn::with_hash_bucket("query_word", 10).unwrap();
        let raw = SparseTensor::from_rows(vec![
            vec!["rust".to_string(), "tensor".to_string()],
            vec!["rust".to_string()],
        ])
        .unwrap();

        let (ids, graph) = transform(&column, raw.into());
        let ids = ids.as_sparse().unwrap();
        let values = ids.values().as_i64().unwrap();
        assert!(values.iter().all(|id| (0..10).contains(id)));
        assert_eq!(values[0], values[2]);
        assert_eq!(graph.op_count("StringToHashBucketFast"), 1);
    }

    #[test]
    fn test_keys_prune_unknown_values() {
        let column = SparseColumn::with_keys("country", &["US", "BRA", "FR"]).unwrap();
        let raw = DenseTensor::from_vec(vec!["FR", "XX", "", "US"], vec![2, 2]).unwrap();

        let (ids, graph) = transform(&column, raw.into());
        let ids = ids.as_sparse().unwrap();
        assert_eq!(ids.values().as_i64().unwrap(), &[2, 0]);
        assert_eq!(ids.index(1), &[1, 1]);
        assert_eq!(graph.op_count("HashTableLookup"), 1);
    }

    #[test]
    fn test_integerized_wraps_ids() {
        let column = SparseColumn::with_integerized_feature("shop_id", 5).unwrap();
        let raw = SparseTensor::from_rows(vec![vec![7i64], vec![], vec![-1, 4]]).unwrap();

        let (ids, _) = transform(&column, raw.into());
        assert_eq!(ids.as_sparse().unwrap().values().as_i64().unwrap(), &[2, 4, 4]);
    }

    #[test]
    fn test_invalid_definitions() {
        assert!(SparseColumn::with_hash_bucket("q", 1).is_err());
        assert!(SparseColumn::with_keys::<&str>("q", &[]).is_err());
        assert!(SparseColumn::with_integerized_feature("q", 0).is_err());
        assert!(SparseColumn::new("q", IdMapping::Integerized { bucket_size: 3 }, DataType::String).is_err());
    }

    #[test]
    fn test_not_usable_in_dnn() {
        let column = SparseColumn::with_hash_bucket("query_word", 10).unwrap();
        let raw: Tensor = SparseTensor::from_rows(vec![vec![1i64]]).unwrap().into();
        let options = WeightOptions {
            scope: "input_from_feature_columns",
            collections: None,
            trainable: true,
        };
        assert!(matches!(
            column.to_dnn_input_layer(&raw, &mut Graph::default(), &options),
            Err(Error::UnsupportedInDnn(_))
        ));
    }
}
