//! Feature columns
//!
//! A feature column describes how one input field is encoded for a model:
//! which raw fields it parses, what derived tensor it needs (bucket ids,
//! hashed ids, crossed ids) and how that tensor feeds a dense input layer or
//! a linear model.

mod bucketized;
mod crossed;
mod embedding;
mod real_valued;
mod sparse;

use std::fmt;
use std::sync::Arc;

use tracing::info;

use ml_features_core::initializer::ZerosInitializer;
use ml_features_core::{ops, Combiner, DenseTensor, Graph, Initializer, SparseTensor, Tensor, Variable};
use ml_features_readers::ParseSpec;

use crate::error::{Error, Result};
use crate::transformer::Transformer;

pub use bucketized::BucketizedColumn;
pub use crossed::CrossedColumn;
pub use embedding::EmbeddingColumn;
pub use real_valued::RealValuedColumn;
pub use sparse::{IdMapping, SparseColumn};

/// How a layer builder wants weights created
#[derive(Debug, Clone, Copy)]
pub struct WeightOptions<'a> {
    /// Name scope the weights are created under
    pub scope: &'a str,
    /// Collections the weights are registered into
    pub collections: Option<&'a [String]>,
    /// Whether the weights are trainable
    pub trainable: bool,
}

impl WeightOptions<'_> {
    /// Create a weight for `column` named `{scope}/{column name}/{weight}`
    pub fn create_weight(
        &self,
        graph: &mut Graph,
        column: &dyn FeatureColumn,
        weight: &str,
        shape: Vec<usize>,
        initializer: &dyn Initializer,
    ) -> Result<Arc<Variable>> {
        let name = format!("{}/{}/{weight}", self.scope, column.name());
        let variable =
            graph.create_variable(&name, shape, initializer, self.trainable, self.collections)?;
        info!(
            "Created variable {}, with device={}",
            variable.name(),
            variable.device()
        );
        Ok(variable)
    }
}

/// A declarative description of how one input field is encoded
pub trait FeatureColumn: fmt::Debug + Send + Sync {
    /// Human-readable name, used for weight names and error messages
    fn name(&self) -> String;

    /// Canonical key. Columns with equal keys are interchangeable.
    fn key(&self) -> String;

    /// Register the raw fields this column parses from examples
    fn add_parse_spec(&self, specs: &mut ParseSpec) -> Result<()>;

    /// Compute this column's transformed tensor and store it in the transformer.
    ///
    /// Columns built on other columns must resolve them through
    /// `transformer` so shared dependencies are computed once.
    fn insert_transformed_feature(&self, transformer: &mut Transformer<'_>) -> Result<()>;

    /// Render the transformed tensor as a dense `[batch, width]` slice
    fn to_dnn_input_layer(
        &self,
        input: &Tensor,
        graph: &mut Graph,
        options: &WeightOptions<'_>,
    ) -> Result<DenseTensor> {
        let _ = (input, graph, options);
        Err(Error::UnsupportedInDnn(self.name()))
    }

    /// Compute this column's `[batch, num_outputs]` contribution to a linear
    /// model, together with the weights it created
    fn to_weighted_sum(
        &self,
        input: &Tensor,
        num_outputs: usize,
        graph: &mut Graph,
        options: &WeightOptions<'_>,
    ) -> Result<(DenseTensor, Vec<Arc<Variable>>)> {
        let _ = (input, num_outputs, graph, options);
        Err(Error::UnsupportedInLinear(self.name()))
    }

    /// Number of distinct ids this column produces, if it produces ids
    fn id_space(&self) -> Option<usize> {
        None
    }

    /// Sparse `Int64` ids in `[0, id_space)` derived from the transformed tensor
    fn sparse_ids(&self, transformed: &Tensor) -> Result<SparseTensor> {
        let _ = transformed;
        Err(Error::InvalidColumn(format!("{} does not produce ids", self.name())))
    }

    /// Whether this column can be a component of a cross
    fn can_cross(&self) -> bool {
        false
    }

    /// Combiner used when several ids of one example are weighted
    fn combiner(&self) -> Combiner {
        Combiner::Sum
    }
}

/// Linear contribution of an id-producing column: a lookup into a
/// zero-initialized `[id_space, num_outputs]` weight
pub(crate) fn sparse_weighted_sum(
    column: &dyn FeatureColumn,
    input: &Tensor,
    num_outputs: usize,
    graph: &mut Graph,
    options: &WeightOptions<'_>,
) -> Result<(DenseTensor, Vec<Arc<Variable>>)> {
    let id_space = column
        .id_space()
        .ok_or_else(|| Error::UnsupportedInLinear(column.name()))?;
    let ids = column.sparse_ids(input)?;
    let weight = options.create_weight(
        graph,
        column,
        "weights",
        vec![id_space, num_outputs],
        &ZerosInitializer,
    )?;
    let output = ops::embedding_lookup_sparse(weight.value(), &ids, column.combiner())?;
    Ok((output, vec![weight]))
}

pub(crate) fn join_keys(columns: &[Arc<dyn FeatureColumn>]) -> String {
    columns
        .iter()
        .map(|c| c.key())
        .collect::<Vec<_>>()
        .join(", ")
}
