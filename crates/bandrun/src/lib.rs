//! Banded-report execution core
//!
//! This crate ties the bandrun subsystems together:
//!
//! - Expression evaluation against records (`bandrun-eval`)
//! - Variable dependency resolution (`bandrun-graph`)
//! - Group break detection and scope state (`bandrun-scope`)
//! - Running aggregate variables with hierarchical reset scopes
//!
//! The engine consumes an already-sorted record stream; it never sorts,
//! renders, formats, or performs I/O. Those concerns belong to the
//! data-loading, DSL-compilation, and rendering collaborators.
//!
//! # Example
//!
//! ```
//! use bandrun::run::ReportRun;
//! use bandrun::{CalcEngine, Expression, GroupDefinition, ResetScope, Value, VariableDefinition};
//!
//! let mut run = ReportRun::new(
//!     vec![GroupDefinition::new("region", 1, Expression::field("region"))],
//!     vec![
//!         VariableDefinition::sum("region_total", Expression::field("amount"))
//!             .with_reset_scope(ResetScope::Group(1)),
//!     ],
//!     CalcEngine::new(),
//! )?;
//!
//! let record = [
//!     ("region".to_string(), Value::from("West")),
//!     ("amount".to_string(), Value::from(100)),
//! ]
//! .into_iter()
//! .collect();
//!
//! let step = run.process_record(record);
//! assert!(step.outcome.group_changes.is_empty()); // first record: no break
//! # Ok::<(), bandrun::GraphError>(())
//! ```

// Re-export all public APIs from internal crates
pub use bandrun_ast as ast;
pub use bandrun_eval as eval;
pub use bandrun_graph as graph;
pub use bandrun_scope as scope;

// Convenience re-exports
pub use bandrun_ast::{
    AggregateKind, BreakClassification, Expression, GroupDefinition, NativeFault, Record,
    ResetScope, SortDirection, Value, VariableDefinition,
};
pub use bandrun_eval::{
    CalcEngine, EvalError, EvalResult, FunctionRegistry, SharedFunctionRegistry,
    extract_field_references,
};
pub use bandrun_graph::{DependencyGraph, GraphError, GraphResult};
pub use bandrun_scope::{
    GroupProcessor, ProcessedRecord, RecordOutcome, VariableRuntime, VariableUpdateError,
    variables_to_reset,
};

pub mod run;

pub use run::{ReportRun, ReportStep};
