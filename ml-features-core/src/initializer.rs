//! Weight initializers for graph variables
//!
//! Initializers draw from the graph's seeded RNG, so two graphs built with
//! the same seed produce identical starting weights.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Produces initial values for a variable of a given shape.
pub trait Initializer: Send + Sync {
    /// Generate `shape.iter().product()` values in row-major order.
    fn initialize(&self, shape: &[usize], rng: &mut StdRng) -> Vec<f32>;

    /// Returns the name of this initializer, for logging.
    fn name(&self) -> &str;
}

/// Initializer that sets all values to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZerosInitializer;

impl Initializer for ZerosInitializer {
    fn initialize(&self, shape: &[usize], _rng: &mut StdRng) -> Vec<f32> {
        vec![0.0; shape.iter().product()]
    }

    fn name(&self) -> &str {
        "zeros"
    }
}

/// Initializer that sets all values to a constant.
#[derive(Debug, Clone, Copy)]
pub struct ConstantInitializer {
    value: f32,
}

impl ConstantInitializer {
    /// Creates a new constant initializer with the given value.
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl Initializer for ConstantInitializer {
    fn initialize(&self, shape: &[usize], _rng: &mut StdRng) -> Vec<f32> {
        vec![self.value; shape.iter().product()]
    }

    fn name(&self) -> &str {
        "constant"
    }
}

/// Initializer that samples uniformly from `[min_val, max_val)`.
#[derive(Debug, Clone, Copy)]
pub struct RandomUniformInitializer {
    min_val: f32,
    max_val: f32,
}

impl RandomUniformInitializer {
    /// Creates a new uniform initializer; `min_val` must be below `max_val`.
    pub fn new(min_val: f32, max_val: f32) -> Result<Self> {
        if min_val >= max_val {
            return Err(Error::Initializer(format!(
                "min_val ({min_val}) must be less than max_val ({max_val})"
            )));
        }
        Ok(Self { min_val, max_val })
    }
}

impl Initializer for RandomUniformInitializer {
    fn initialize(&self, shape: &[usize], rng: &mut StdRng) -> Vec<f32> {
        (0..shape.iter().product::<usize>())
            .map(|_| rng.gen_range(self.min_val..self.max_val))
            .collect()
    }

    fn name(&self) -> &str {
        "random_uniform"
    }
}

/// Normal initializer that resamples values beyond two standard deviations.
#[derive(Debug, Clone, Copy)]
pub struct TruncatedNormalInitializer {
    mean: f32,
    normal: Normal<f32>,
    stddev: f32,
}

impl TruncatedNormalInitializer {
    /// Creates a new truncated normal initializer; `stddev` must be positive.
    pub fn new(mean: f32, stddev: f32) -> Result<Self> {
        if stddev <= 0.0 || !stddev.is_finite() {
            return Err(Error::Initializer(format!(
                "stddev ({stddev}) must be positive"
            )));
        }
        let normal = Normal::new(mean, stddev).map_err(|e| Error::Initializer(e.to_string()))?;
        Ok(Self {
            mean,
            normal,
            stddev,
        })
    }

    /// Returns the standard deviation.
    pub fn stddev(&self) -> f32 {
        self.stddev
    }
}

impl Initializer for TruncatedNormalInitializer {
    fn initialize(&self, shape: &[usize], rng: &mut StdRng) -> Vec<f32> {
        let lower = self.mean - 2.0 * self.stddev;
        let upper = self.mean + 2.0 * self.stddev;

        (0..shape.iter().product::<usize>())
            .map(|_| loop {
                let val = self.normal.sample(rng);
                if (lower..=upper).contains(&val) {
                    return val;
                }
            })
            .collect()
    }

    fn name(&self) -> &str {
        "truncated_normal"
    }
}

/// Serializable description of an initializer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitializerConfig {
    /// All zeros
    Zeros,
    /// A constant value
    Constant {
        /// The value
        value: f32,
    },
    /// Uniform over `[min_val, max_val)`
    RandomUniform {
        /// Inclusive lower bound
        min_val: f32,
        /// Exclusive upper bound
        max_val: f32,
    },
    /// Normal truncated at two standard deviations
    TruncatedNormal {
        /// Mean
        mean: f32,
        /// Standard deviation
        stddev: f32,
    },
}

impl InitializerConfig {
    /// Instantiate the described initializer.
    pub fn build(&self) -> Result<Box<dyn Initializer>> {
        Ok(match *self {
            InitializerConfig::Zeros => Box::new(ZerosInitializer),
            InitializerConfig::Constant { value } => Box::new(ConstantInitializer::new(value)),
            InitializerConfig::RandomUniform { min_val, max_val } => {
                Box::new(RandomUniformInitializer::new(min_val, max_val)?)
            }
            InitializerConfig::TruncatedNormal { mean, stddev } => {
                Box::new(TruncatedNormalInitializer::new(mean, stddev)?)
            }
        })
    }
}
