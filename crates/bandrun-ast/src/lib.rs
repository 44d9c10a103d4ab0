//! Expression and configuration model for the bandrun report engine
//!
//! This crate defines the data model shared by every other bandrun crate:
//!
//! - `Value`: the runtime value type records and expressions produce
//! - `Record`: one row of the pre-sorted input stream
//! - `Expression`: the tagged expression union evaluated per record
//! - `GroupDefinition` / `VariableDefinition`: resolved report
//!   configuration, supplied by the DSL-compilation collaborator
//! - `BreakClassification`: the per-record break verdict produced by the
//!   group processor
//!
//! The crate is deliberately free of evaluation logic; it only models
//! shapes. Evaluation lives in `bandrun-eval`, break detection and
//! variable state in `bandrun-scope`.

pub mod change;
pub mod definition;
pub mod expression;
pub mod value;

pub use change::BreakClassification;
pub use definition::{
    AggregateKind, GroupDefinition, ResetScope, SortDirection, VariableDefinition,
};
pub use expression::{Expression, NativeFault, NativeFunction};
pub use value::{Record, Value};
