//! Validation of column sets and inference of real-valued columns

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use ml_features_core::Tensor;

use crate::column::{FeatureColumn, RealValuedColumn};
use crate::error::{Error, Result};

/// Fail on the first column whose key was already seen, in the given order
pub fn check_feature_columns(feature_columns: &[Arc<dyn FeatureColumn>]) -> Result<()> {
    let mut seen_keys = HashSet::with_capacity(feature_columns.len());
    for column in feature_columns {
        let key = column.key();
        if seen_keys.contains(&key) {
            return Err(Error::DuplicateKey(key));
        }
        seen_keys.insert(key);
    }
    Ok(())
}

/// Tensors to infer real-valued columns from
#[derive(Debug, Clone, Copy)]
pub enum InferenceInput<'a> {
    /// A single unnamed tensor
    Tensor(&'a Tensor),
    /// Tensors by feature name
    Named(&'a BTreeMap<String, Tensor>),
}

impl<'a> From<&'a Tensor> for InferenceInput<'a> {
    fn from(tensor: &'a Tensor) -> Self {
        InferenceInput::Tensor(tensor)
    }
}

impl<'a> From<&'a BTreeMap<String, Tensor>> for InferenceInput<'a> {
    fn from(tensors: &'a BTreeMap<String, Tensor>) -> Self {
        InferenceInput::Named(tensors)
    }
}

fn infer_real_valued_column(name: &str, tensor: &Tensor) -> Result<RealValuedColumn> {
    if tensor.is_sparse() {
        return Err(Error::SparseNotInferable(name.to_string()));
    }
    let dtype = tensor.dtype();
    if !dtype.is_numeric() {
        return Err(Error::NonNumericNotInferable {
            name: name.to_string(),
            dtype,
        });
    }

    let dimension = tensor.shape().iter().skip(1).product();
    RealValuedColumn::new(name, dimension, dtype)
}

/// Infer one real-valued column per dense numeric tensor.
///
/// The dimension of each column is the number of values per example. A single
/// tensor yields a column named `""`; named tensors yield columns in name
/// order.
pub fn infer_real_valued_columns<'a>(
    features: impl Into<InferenceInput<'a>>,
) -> Result<Vec<RealValuedColumn>> {
    match features.into() {
        InferenceInput::Tensor(tensor) => Ok(vec![infer_real_valued_column("", tensor)?]),
        InferenceInput::Named(tensors) => tensors
            .iter()
            .map(|(name, tensor)| infer_real_valued_column(name, tensor))
            .collect(),
    }
}
