//! Element types for tensor values

use std::fmt;

use serde::{Deserialize, Serialize};

/// Data type of tensor elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean type
    Boolean,

    /// 32-bit signed integer
    Int32,

    /// 64-bit signed integer
    Int64,

    /// 32-bit floating point
    Float32,

    /// 64-bit floating point
    Float64,

    /// UTF-8 encoded string
    String,
}

impl DataType {
    /// Get the size of this type in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::Boolean => 1,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
            DataType::String => 0, // Variable-size
        }
    }

    /// Check if this type is an integer type
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int32 | DataType::Int64)
    }

    /// Check if this type is a floating point type
    pub fn is_floating(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Check if this type is a numeric type
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_floating()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "Boolean"),
            DataType::Int32 => write!(f, "Int32"),
            DataType::Int64 => write!(f, "Int64"),
            DataType::Float32 => write!(f, "Float32"),
            DataType::Float64 => write!(f, "Float64"),
            DataType::String => write!(f, "String"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(DataType::Int32, true ; "int32")]
    #[test_case(DataType::Int64, true ; "int64")]
    #[test_case(DataType::Float32, true ; "float32")]
    #[test_case(DataType::Float64, true ; "float64")]
    #[test_case(DataType::Boolean, false ; "boolean")]
    #[test_case(DataType::String, false ; "string")]
    fn test_is_numeric(dtype: DataType, expected: bool) {
        assert_eq!(dtype.is_numeric(), expected);
    }

    #[test]
    fn test_display() {
        assert_eq!(DataType::Float32.to_string(), "Float32");
        assert_eq!(DataType::String.to_string(), "String");
    }
}
