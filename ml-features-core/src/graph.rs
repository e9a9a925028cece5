//! Model-definition graph: variable store, collections, scopes and op ledger
//!
//! A [`Graph`] is owned by one model-building pass. Builders borrow it
//! mutably, so it never needs internal locking.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::initializer::Initializer;
use crate::tensor::DenseTensor;
use crate::variable::Variable;

/// Well-known collection names
pub mod graph_keys {
    /// Every variable created in the graph
    pub const VARIABLES: &str = "variables";

    /// Variables that gradient updates may change
    pub const TRAINABLE_VARIABLES: &str = "trainable_variables";
}

/// Graph-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Device assigned to every variable
    pub device: String,

    /// Seed for weight initialization
    pub seed: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            device: "/cpu:0".to_string(),
            seed: 0,
        }
    }
}

/// Resolve the collections a new variable is registered into.
///
/// Requested collections are kept in order with duplicates removed, and the
/// global [`graph_keys::VARIABLES`] collection is always included.
pub fn variable_collections(requested: Option<&[String]>) -> Vec<String> {
    let mut collections: Vec<String> = Vec::new();
    for name in requested.unwrap_or_default() {
        if !collections.contains(name) {
            collections.push(name.clone());
        }
    }
    if !collections.iter().any(|c| c == graph_keys::VARIABLES) {
        collections.push(graph_keys::VARIABLES.to_string());
    }
    collections
}

/// Store for everything created while defining a model
pub struct Graph {
    config: GraphConfig,
    variables: BTreeMap<String, Arc<Variable>>,
    collections: HashMap<String, Vec<Arc<Variable>>>,
    name_counts: HashMap<String, usize>,
    op_counts: BTreeMap<String, usize>,
    rng: StdRng,
}

impl Graph {
    /// Create an empty graph
    pub fn new(config: GraphConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            variables: BTreeMap::new(),
            collections: HashMap::new(),
            name_counts: HashMap::new(),
            op_counts: BTreeMap::new(),
            rng,
        }
    }

    /// Get the graph settings
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Open a name scope.
    ///
    /// An explicit `name` is used verbatim. Otherwise `default` is used the
    /// first time and suffixed with `_1`, `_2`, ... afterwards.
    pub fn unique_scope(&mut self, name: Option<&str>, default: &str) -> String {
        let scope = match name {
            Some(name) => name.to_string(),
            None => {
                let count = self.name_counts.entry(default.to_string()).or_insert(0);
                let scope = if *count == 0 {
                    default.to_string()
                } else {
                    format!("{default}_{count}")
                };
                *count += 1;
                scope
            }
        };
        debug!(scope = %scope, "Opened name scope");
        scope
    }

    /// Create and register a variable
    pub fn create_variable(
        &mut self,
        name: &str,
        shape: Vec<usize>,
        initializer: &dyn Initializer,
        trainable: bool,
        collections: Option<&[String]>,
    ) -> Result<Arc<Variable>> {
        if self.variables.contains_key(name) {
            return Err(Error::DuplicateVariable(name.to_string()));
        }

        let values = initializer.initialize(&shape, &mut self.rng);
        let value = DenseTensor::from_vec(values, shape)?;

        let mut collections = variable_collections(collections);
        if trainable && !collections.iter().any(|c| c == graph_keys::TRAINABLE_VARIABLES) {
            collections.push(graph_keys::TRAINABLE_VARIABLES.to_string());
        }

        let variable = Arc::new(Variable::new(
            name.to_string(),
            value,
            trainable,
            self.config.device.clone(),
            collections.clone(),
        ));

        for collection in collections {
            self.collections
                .entry(collection)
                .or_default()
                .push(Arc::clone(&variable));
        }
        self.variables.insert(name.to_string(), Arc::clone(&variable));

        debug!(
            name,
            initializer = initializer.name(),
            shape = ?variable.shape(),
            "Created variable"
        );
        Ok(variable)
    }

    /// Look up a variable by its scope-qualified name
    pub fn variable(&self, name: &str) -> Option<&Arc<Variable>> {
        self.variables.get(name)
    }

    /// All variables, ordered by name
    pub fn variables(&self) -> impl Iterator<Item = &Arc<Variable>> {
        self.variables.values()
    }

    /// Variables registered into a collection, in creation order
    pub fn collection(&self, name: &str) -> &[Arc<Variable>] {
        self.collections.get(name).map_or(&[], Vec::as_slice)
    }

    /// Variables that gradient updates may change
    pub fn trainable_variables(&self) -> &[Arc<Variable>] {
        self.collection(graph_keys::TRAINABLE_VARIABLES)
    }

    /// Record one execution of an op, returning its unique op name
    pub fn record_op(&mut self, op_type: &str) -> String {
        let count = self.op_counts.entry(op_type.to_string()).or_insert(0);
        let op_name = if *count == 0 {
            op_type.to_string()
        } else {
            format!("{op_type}_{count}")
        };
        *count += 1;
        debug!(op = %op_name, "Executed op");
        op_name
    }

    /// Number of times an op type was executed
    pub fn op_count(&self, op_type: &str) -> usize {
        self.op_counts.get(op_type).copied().unwrap_or(0)
    }

    /// Execution counts for every op type
    pub fn op_counts(&self) -> &BTreeMap<String, usize> {
        &self.op_counts
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}
