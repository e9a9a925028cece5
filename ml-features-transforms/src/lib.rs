//! Feature columns and the layer builders that consume them
//!
//! This crate turns declarative feature columns (real-valued, bucketized,
//! sparse, embedded and crossed) into the tensors and weight variables of a
//! model's input layer or linear logits. Columns are materialized through a
//! memoizing [`Transformer`], so a column shared by several consumers is
//! transformed once.

#![warn(missing_docs)]

pub mod column;
pub mod config;
pub mod error;
pub mod layers;
pub mod parsing;
pub mod transformer;
pub mod validation;

pub use column::{
    BucketizedColumn, CrossedColumn, EmbeddingColumn, FeatureColumn, IdMapping, RealValuedColumn,
    SparseColumn, WeightOptions,
};
pub use config::{load_feature_columns, ColumnDef, FeaturesConfig, LayerOptions};
pub use error::{Error, Result};
pub use layers::{input_from_feature_columns, weighted_sum_from_feature_columns, WeightedSum};
pub use parsing::{create_feature_spec_for_parsing, parse_feature_columns_from_examples};
pub use transformer::{ColumnsToTensors, TensorKey, Transformer};
pub use validation::{check_feature_columns, infer_real_valued_columns, InferenceInput};

// Re-export core types
pub use ml_features_core::{Combiner, DataType, DenseTensor, Graph, GraphConfig, SparseTensor, Tensor, Variable};
