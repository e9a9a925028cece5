//! Trainable weight variables

use std::fmt;

use crate::tensor::DenseTensor;

/// A named weight created while building a model
pub struct Variable {
    /// Scope-qualified name
    name: String,

    /// Initial value
    value: DenseTensor,

    /// Whether gradient updates may change this variable
    trainable: bool,

    /// Device the variable was placed on
    device: String,

    /// Collections this variable was registered into
    collections: Vec<String>,
}

impl Variable {
    pub(crate) fn new(
        name: String,
        value: DenseTensor,
        trainable: bool,
        device: String,
        collections: Vec<String>,
    ) -> Self {
        Self {
            name,
            value,
            trainable,
            device,
            collections,
        }
    }

    /// Get the scope-qualified name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the shape
    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    /// Get the initial value
    pub fn value(&self) -> &DenseTensor {
        &self.value
    }

    /// Check whether this variable is trainable
    pub fn trainable(&self) -> bool {
        self.trainable
    }

    /// Get the device placement
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Get the collections this variable belongs to
    pub fn collections(&self) -> &[String] {
        &self.collections
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Variable{{ name: {}, shape: {:?}, trainable: {}, device: {} }}",
            self.name,
            self.shape(),
            self.trainable,
            self.device
        )
    }
}
