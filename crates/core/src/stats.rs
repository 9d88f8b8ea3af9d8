//! Injectable registry of named counters
//!
//! Components receive an `Arc<Statistics>` at construction and register the
//! variables they update. The registry is created once at startup; nothing
//! here is process-global.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A single named counter
#[derive(Debug)]
pub struct Variable {
    name: String,
    value: AtomicI64,
}

impl Variable {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: AtomicI64::new(0),
        }
    }

    /// Name the variable was registered under
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `delta` and return the new value
    pub fn add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::Relaxed) + delta
    }

    /// Add one
    pub fn increment(&self) {
        self.add(1);
    }

    /// Current value
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Overwrite the value
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }
}

/// Registry of counters shared between components
#[derive(Debug, Default)]
pub struct Statistics {
    variables: RwLock<BTreeMap<String, Arc<Variable>>>,
}

impl Statistics {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, or return the existing variable of that name
    pub fn add_variable(&self, name: &str) -> Arc<Variable> {
        if let Some(var) = self.variables.read().get(name) {
            return Arc::clone(var);
        }
        let mut variables = self.variables.write();
        Arc::clone(
            variables
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Variable::new(name))),
        )
    }

    /// Look up a registered variable
    #[must_use]
    pub fn find_variable(&self, name: &str) -> Option<Arc<Variable>> {
        self.variables.read().get(name).cloned()
    }

    /// Value of `name`, or 0 when it was never registered
    #[must_use]
    pub fn value(&self, name: &str) -> i64 {
        self.find_variable(name).map_or(0, |v| v.get())
    }

    /// Point-in-time copy of every counter, sorted by name
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.variables
            .read()
            .iter()
            .map(|(name, var)| (name.clone(), var.get()))
            .collect()
    }

    /// Reset every counter to zero, keeping registrations
    pub fn clear(&self) {
        for var in self.variables.read().values() {
            var.set(0);
        }
    }
}
