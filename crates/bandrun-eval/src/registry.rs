//! Function registry for custom `Call` expressions
//!
//! The registry is an injectable, run-scoped key-value store passed into
//! the calculation engine - not ambient global state. Callers that want
//! one registry shared across concurrent runs use `SharedFunctionRegistry`
//! and snapshot it per run.

use crate::error::EvalResult;
use bandrun_ast::{Record, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Implementation signature for registered functions.
///
/// Arguments arrive already resolved; the current record is passed through
/// for functions that need raw field access.
pub type RegistryFn = Arc<dyn Fn(&[Value], &Record) -> EvalResult<Value> + Send + Sync>;

/// Run-scoped registry mapping function names to implementations.
///
/// Registration has create-or-replace semantics; there is no removal.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, RegistryFn>,
}

impl FunctionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function, replacing any existing one with the same name
    pub fn register_function<F>(&mut self, name: impl Into<String>, implementation: F)
    where
        F: Fn(&[Value], &Record) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(implementation));
    }

    /// Get a function implementation
    pub fn get_function(&self, name: &str) -> Option<&RegistryFn> {
        self.functions.get(name)
    }

    /// All registered function names, sorted
    pub fn list_functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Registry handle shared across report runs.
///
/// Cloning the handle shares the underlying store; `snapshot` produces a
/// detached `FunctionRegistry` for lock-free evaluation within one run.
#[derive(Default, Clone)]
pub struct SharedFunctionRegistry {
    inner: Arc<RwLock<FunctionRegistry>>,
}

impl SharedFunctionRegistry {
    /// Create a new empty shared registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing registry
    pub fn from_registry(registry: FunctionRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    /// Register a function, replacing any existing one with the same name
    pub fn register_function<F>(&self, name: impl Into<String>, implementation: F)
    where
        F: Fn(&[Value], &Record) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.inner.write().register_function(name, implementation);
    }

    /// All registered function names, sorted
    pub fn list_functions(&self) -> Vec<String> {
        self.inner.read().list_functions()
    }

    /// Detached copy of the current registry contents.
    ///
    /// Implementations are `Arc`s, so the copy is cheap.
    pub fn snapshot(&self) -> FunctionRegistry {
        self.inner.read().clone()
    }
}
