//! Configuration for layer builders and JSON-declared column sets

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ml_features_core::{Combiner, DataType, GraphConfig, InitializerConfig};

use crate::column::{
    BucketizedColumn, CrossedColumn, EmbeddingColumn, FeatureColumn, IdMapping, RealValuedColumn,
    SparseColumn,
};
use crate::error::{Error, Result};

/// Options shared by the layer builders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerOptions {
    /// Collections every created weight is added to
    pub weight_collections: Option<Vec<String>>,

    /// Name scope; a unique default is used when absent
    pub name: Option<String>,

    /// Whether created weights are trainable
    pub trainable: bool,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            weight_collections: None,
            name: None,
            trainable: true,
        }
    }
}

fn default_dimension() -> usize {
    1
}

fn default_real_dtype() -> DataType {
    DataType::Float32
}

fn default_sparse_dtype() -> DataType {
    DataType::String
}

fn default_embedding_combiner() -> Combiner {
    Combiner::Mean
}

/// Serializable description of a feature column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnDef {
    /// See [`RealValuedColumn`]
    RealValued {
        /// Raw field name
        column_name: String,
        /// Values per example
        #[serde(default = "default_dimension")]
        dimension: usize,
        /// Element type
        #[serde(default = "default_real_dtype")]
        dtype: DataType,
        /// Value used when an example lacks the field
        #[serde(default)]
        default_value: Option<Vec<f64>>,
    },
    /// See [`BucketizedColumn`]
    Bucketized {
        /// A `real_valued` definition
        source: Box<ColumnDef>,
        /// Strictly increasing bucket boundaries
        boundaries: Vec<f32>,
    },
    /// See [`SparseColumn`]
    Sparse {
        /// Raw field name
        column_name: String,
        /// How values become ids
        id_mapping: IdMapping,
        /// Combiner for linear models
        #[serde(default)]
        combiner: Combiner,
        /// Element type
        #[serde(default = "default_sparse_dtype")]
        dtype: DataType,
    },
    /// See [`EmbeddingColumn`]
    Embedding {
        /// An id-producing definition
        sparse_id_column: Box<ColumnDef>,
        /// Embedding width
        dimension: usize,
        /// Combiner for examples with several ids
        #[serde(default = "default_embedding_combiner")]
        combiner: Combiner,
        /// Weight initializer; truncated normal when absent
        #[serde(default)]
        initializer: Option<InitializerConfig>,
    },
    /// See [`CrossedColumn`]
    Crossed {
        /// Crossable definitions
        columns: Vec<ColumnDef>,
        /// Size of the crossed id space
        hash_bucket_size: usize,
        /// Combiner for linear models
        #[serde(default)]
        combiner: Combiner,
    },
}

impl ColumnDef {
    /// Construct the described column
    pub fn build(&self) -> Result<Arc<dyn FeatureColumn>> {
        let column: Arc<dyn FeatureColumn> = match self {
            ColumnDef::RealValued { .. } => Arc::new(self.build_real_valued()?),
            ColumnDef::Bucketized { source, boundaries } => Arc::new(BucketizedColumn::new(
                source.build_real_valued()?,
                boundaries.clone(),
            )?),
            ColumnDef::Sparse {
                column_name,
                id_mapping,
                combiner,
                dtype,
            } => Arc::new(
                SparseColumn::new(column_name, id_mapping.clone(), *dtype)?.with_combiner(*combiner),
            ),
            ColumnDef::Embedding {
                sparse_id_column,
                dimension,
                combiner,
                initializer,
            } => {
                let mut column = EmbeddingColumn::new(sparse_id_column.build()?, *dimension)?
                    .with_combiner(*combiner);
                if let Some(initializer) = initializer {
                    column = column.with_initializer(*initializer)?;
                }
                Arc::new(column)
            }
            ColumnDef::Crossed {
                columns,
                hash_bucket_size,
                combiner,
            } => {
                let columns = columns.iter().map(ColumnDef::build).collect::<Result<Vec<_>>>()?;
                Arc::new(CrossedColumn::new(columns, *hash_bucket_size)?.with_combiner(*combiner))
            }
        };
        Ok(column)
    }

    fn build_real_valued(&self) -> Result<RealValuedColumn> {
        match self {
            ColumnDef::RealValued {
                column_name,
                dimension,
                dtype,
                default_value,
            } => {
                let column = RealValuedColumn::new(column_name, *dimension, *dtype)?;
                match default_value {
                    Some(default_value) => column.with_default(default_value.clone()),
                    None => Ok(column),
                }
            }
            other => Err(Error::InvalidColumn(format!(
                "expected a real_valued column, got {other:?}"
            ))),
        }
    }
}

/// A column set with the options to build layers from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturesConfig {
    /// Column definitions
    pub columns: Vec<ColumnDef>,

    /// Layer builder options
    #[serde(default)]
    pub layer: LayerOptions,

    /// Graph settings
    #[serde(default)]
    pub graph: GraphConfig,
}

impl FeaturesConfig {
    /// Read a configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Construct every declared column, in declaration order
    pub fn build_columns(&self) -> Result<Vec<Arc<dyn FeatureColumn>>> {
        self.columns.iter().map(ColumnDef::build).collect()
    }
}

/// Read a JSON configuration and construct its columns
pub fn load_feature_columns(path: impl AsRef<Path>) -> Result<Vec<Arc<dyn FeatureColumn>>> {
    FeaturesConfig::load(path)?.build_columns()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"{
        "columns": [
            {"type": "real_valued", "column_name": "age"},
            {
                "type": "bucketized",
                "source": {"type": "real_valued", "column_name": "age"},
                "boundaries": [18.0, 21.0, 30.0]
            },
            {
                "type": "embedding",
                "sparse_id_column": {
                    "type": "sparse",
                    "column_name": "query_word",
                    "id_mapping": {"type": "hash_bucket", "hash_bucket_size": 1000}
                },
                "dimension": 8
            },
            {
                "type": "crossed",
                "columns": [
                    {
                        "type": "sparse",
                        "column_name": "country",
                        "id_mapping": {"type": "keys", "keys": ["US", "BRA"]}
                    },
                    {
                        "type": "sparse",
                        "column_name": "query_word",
                        "id_mapping": {"type": "hash_bucket", "hash_bucket_size": 1000}
                    }
                ],
                "hash_bucket_size": 10000
            }
        ],
        "layer": {"name": "linear", "trainable": false},
        "graph": {"seed": 42}
    }"#;

    #[test]
    fn test_load_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(CONFIG.as_bytes())?;

        let config = FeaturesConfig::load(file.path())?;
        assert_eq!(config.layer.name.as_deref(), Some("linear"));
        assert!(!config.layer.trainable);
        assert_eq!(config.graph.seed, 42);
        assert_eq!(config.graph.device, "/cpu:0");

        let columns = load_feature_columns(file.path())?;
        let names = columns.iter().map(|c| c.name()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["age", "age_bucketized", "query_word_embedding", "country_X_query_word"]
        );
        Ok(())
    }

    #[test]
    fn test_layer_options_defaults() {
        let options: LayerOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, LayerOptions::default());
        assert!(options.trainable);
    }

    #[test]
    fn test_bucketized_needs_real_valued_source() {
        let def: ColumnDef = serde_json::from_str(
            r#"{
                "type": "bucketized",
                "source": {
                    "type": "sparse",
                    "column_name": "q",
                    "id_mapping": {"type": "hash_bucket", "hash_bucket_size": 10}
                },
                "boundaries": [1.0]
            }"#,
        )
        .unwrap();
        assert!(matches!(def.build(), Err(Error::InvalidColumn(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_feature_columns("/nonexistent/features.json"),
            Err(Error::Io(_))
        ));
    }
}
