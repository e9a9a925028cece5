//! Serialized example records
//!
//! An [`Example`] is one training record: a map from feature name to a list
//! of bytes, floats or integers. Records travel as bincode-encoded bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The values of one feature in one example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Feature {
    /// Byte strings (parsed as UTF-8 text)
    BytesList(Vec<Vec<u8>>),
    /// 32-bit floats
    FloatList(Vec<f32>),
    /// 64-bit integers
    Int64List(Vec<i64>),
}

impl Feature {
    /// Create a bytes feature from strings
    pub fn bytes<S: AsRef<str>>(values: &[S]) -> Self {
        Feature::BytesList(values.iter().map(|v| v.as_ref().as_bytes().to_vec()).collect())
    }

    /// Number of values
    pub fn len(&self) -> usize {
        match self {
            Feature::BytesList(v) => v.len(),
            Feature::FloatList(v) => v.len(),
            Feature::Int64List(v) => v.len(),
        }
    }

    /// Check if there are no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the value kind, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Feature::BytesList(_) => "bytes_list",
            Feature::FloatList(_) => "float_list",
            Feature::Int64List(_) => "int64_list",
        }
    }
}

/// One training record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Features by name
    pub features: BTreeMap<String, Feature>,
}

impl Example {
    /// Create an empty example
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a feature, returning the example for chaining
    #[must_use]
    pub fn with_feature(mut self, name: &str, feature: Feature) -> Self {
        self.features.insert(name.to_string(), feature);
        self
    }

    /// Get a feature by name
    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.get(name)
    }

    /// Serialize to the wire format
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from the wire format
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
