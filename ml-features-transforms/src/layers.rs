//! Layer builders that turn feature columns into model inputs
//!
//! [`input_from_feature_columns`] concatenates dense renderings of every
//! column into the input of a neural network. [`weighted_sum_from_feature_columns`]
//! builds the logits of a linear model. Both resolve columns through one
//! [`Transformer`], so columns shared between several consumers are computed
//! once.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use ml_features_core::initializer::ZerosInitializer;
use ml_features_core::graph::variable_collections;
use ml_features_core::{ops, DenseTensor, Graph, Variable};

use crate::column::{FeatureColumn, WeightOptions};
use crate::config::LayerOptions;
use crate::error::{Error, Result};
use crate::transformer::{ColumnsToTensors, Transformer};
use crate::validation::check_feature_columns;

/// Output of [`weighted_sum_from_feature_columns`]
#[derive(Debug)]
pub struct WeightedSum {
    /// `[batch, num_outputs]` predictions including the bias
    pub predictions: DenseTensor,
    /// Weights created for each column, by column key
    pub column_to_variable: BTreeMap<String, Vec<Arc<Variable>>>,
    /// `[num_outputs]` bias
    pub bias: Arc<Variable>,
}

/// Columns in key order
pub(crate) fn sorted_by_key(feature_columns: &[Arc<dyn FeatureColumn>]) -> Vec<&Arc<dyn FeatureColumn>> {
    let mut columns = feature_columns.iter().collect::<Vec<_>>();
    columns.sort_by_key(|c| c.key());
    columns
}

/// Build the dense input layer of a neural network.
///
/// Every column is rendered as a `[batch, width]` slice and the slices are
/// concatenated in column key order. Sparse and crossed columns have no
/// dense rendering and must be wrapped in an embedding column.
pub fn input_from_feature_columns(
    columns_to_tensors: &mut ColumnsToTensors,
    feature_columns: &[Arc<dyn FeatureColumn>],
    graph: &mut Graph,
    options: &LayerOptions,
) -> Result<DenseTensor> {
    check_feature_columns(feature_columns)?;
    let scope = graph.unique_scope(options.name.as_deref(), "input_from_feature_columns");

    let collections = options
        .weight_collections
        .as_deref()
        .map(|requested| variable_collections(Some(requested)));
    let weights = WeightOptions {
        scope: &scope,
        collections: collections.as_deref(),
        trainable: options.trainable,
    };

    let mut outputs = Vec::with_capacity(feature_columns.len());
    let mut transformer = Transformer::new(columns_to_tensors, graph);
    for column in sorted_by_key(feature_columns) {
        let transformed = transformer.transform(column.as_ref())?;
        let output = column.to_dnn_input_layer(&transformed, transformer.graph(), &weights)?;
        debug!(column = %column.name(), width = output.row_width(), "Rendered dense input");
        outputs.push(output);
    }

    Ok(ops::concat(&outputs)?)
}

/// Build the weighted sum (logits) of a linear model.
///
/// Every column contributes a `[batch, num_outputs]` term from its own
/// weights; the terms are summed and a zero-initialized `bias_weight` is
/// added. The bias is always trainable. `options.trainable` only governs
/// the column weights.
pub fn weighted_sum_from_feature_columns(
    columns_to_tensors: &mut ColumnsToTensors,
    feature_columns: &[Arc<dyn FeatureColumn>],
    num_outputs: usize,
    graph: &mut Graph,
    options: &LayerOptions,
) -> Result<WeightedSum> {
    check_feature_columns(feature_columns)?;
    if num_outputs == 0 {
        return Err(Error::InvalidArgument(
            "num_outputs must be at least 1".to_string(),
        ));
    }
    let scope = graph.unique_scope(options.name.as_deref(), "weighted_sum_from_feature_columns");
    let weights = WeightOptions {
        scope: &scope,
        collections: options.weight_collections.as_deref(),
        trainable: options.trainable,
    };

    let mut outputs = Vec::with_capacity(feature_columns.len());
    let mut column_to_variable = BTreeMap::new();
    let mut transformer = Transformer::new(columns_to_tensors, graph);
    for column in sorted_by_key(feature_columns) {
        let transformed = transformer.transform(column.as_ref())?;
        let (output, variables) =
            column.to_weighted_sum(&transformed, num_outputs, transformer.graph(), &weights)?;
        outputs.push(output);
        column_to_variable.insert(column.key(), variables);
    }

    let predictions_no_bias = ops::add_n(&outputs)?;
    let bias = graph.create_variable(
        &format!("{scope}/bias_weight"),
        vec![num_outputs],
        &ZerosInitializer,
        true,
        options.weight_collections.as_deref(),
    )?;
    info!("Created variable {}, with device={}", bias.name(), bias.device());
    let predictions = ops::bias_add(&predictions_no_bias, bias.value())?;

    Ok(WeightedSum {
        predictions,
        column_to_variable,
        bias,
    })
}
