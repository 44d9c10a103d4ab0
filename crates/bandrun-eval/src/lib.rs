//! Calculation engine for the bandrun report core
//!
//! Evaluates scalar expressions against records:
//!
//! - **Field access**: direct field refs and relationship traversal
//! - **Arithmetic**: `+ - * /` with integer/decimal promotion and string
//!   concatenation
//! - **Conditionals**: `if` with null-aware truthiness
//! - **Custom functions**: run-scoped injectable registry
//! - **Native closures**: invoked behind a panic-capture boundary so no
//!   fault escapes the engine untyped
//!
//! `evaluate` returns every failure as a typed [`EvalError`]; the only
//! fail-fast surface is the explicit [`CalcEngine::evaluate_strict`]
//! wrapper. `validate` checks expression shapes without a record, and
//! [`extract_field_references`] is the static analysis the data-loading
//! collaborator uses for preload decisions.

pub mod engine;
pub mod error;
pub mod registry;

pub use engine::{CalcEngine, apply_arithmetic, extract_field_references};
pub use error::{EvalError, EvalResult};
pub use registry::{FunctionRegistry, RegistryFn, SharedFunctionRegistry};
