//! Per-feature parsing schema

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use ml_features_core::DataType;

use crate::error::{Error, Result};

/// How one feature of an example is turned into a tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureSpec {
    /// Exactly `shape.product()` values per example, parsed into a dense
    /// `[batch, shape...]` tensor
    FixedLen {
        /// Per-example shape
        shape: Vec<usize>,
        /// Element type
        dtype: DataType,
        /// Values used when an example lacks the feature
        default_value: Option<Vec<f64>>,
    },
    /// Any number of values per example, parsed into a sparse
    /// `[batch, max_len]` tensor
    VarLen {
        /// Element type
        dtype: DataType,
    },
}

impl FeatureSpec {
    /// Element type of the parsed tensor
    pub fn dtype(&self) -> DataType {
        match self {
            FeatureSpec::FixedLen { dtype, .. } | FeatureSpec::VarLen { dtype } => *dtype,
        }
    }
}

impl fmt::Display for FeatureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureSpec::FixedLen { shape, dtype, .. } => {
                write!(f, "FixedLen({shape:?}, {dtype})")
            }
            FeatureSpec::VarLen { dtype } => write!(f, "VarLen({dtype})"),
        }
    }
}

/// Feature name to parse spec
pub type ParseSpec = BTreeMap<String, FeatureSpec>;

/// Add `spec` for `name`, failing if a different spec is already registered
pub fn merge_spec(specs: &mut ParseSpec, name: &str, spec: FeatureSpec) -> Result<()> {
    match specs.get(name) {
        Some(existing) if *existing != spec => Err(Error::Schema(format!(
            "Conflicting parse specs for feature {name}: {existing} vs {spec}"
        ))),
        Some(_) => Ok(()),
        None => {
            specs.insert(name.to_string(), spec);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_spec() {
        let mut specs = ParseSpec::new();
        let var = FeatureSpec::VarLen { dtype: DataType::String };
        merge_spec(&mut specs, "q", var.clone()).unwrap();
        merge_spec(&mut specs, "q", var).unwrap();
        assert_eq!(specs.len(), 1);

        let conflicting = FeatureSpec::VarLen { dtype: DataType::Int64 };
        assert!(matches!(
            merge_spec(&mut specs, "q", conflicting),
            Err(Error::Schema(_))
        ));
    }
}
