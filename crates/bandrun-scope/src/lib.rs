//! Scope management and variable runtime for the bandrun report core
//!
//! Two cooperating pieces live here:
//!
//! - [`GroupProcessor`]: the scope state machine. Classifies each record
//!   of an already-sorted stream against its predecessor (detail change,
//!   group break at the smallest differing level, page transition) and
//!   tracks group key values, page number, and detail count.
//! - [`VariableRuntime`]: one stateful aggregator per declared variable,
//!   reset according to the break classification and each variable's
//!   declared scope, accumulated in dependency-resolver order.
//!
//! Data flow per record: the processor classifies the break, the runtime
//! resets the variables the break invalidates and then folds in the
//! record's contribution. Both halves deliberately degrade instead of
//! aborting: a failing group-key expression projects `Null`, a failing
//! variable keeps its previous state, and the run continues.

pub mod processor;
pub mod reset;
pub mod variables;

pub use processor::{GroupProcessor, ProcessedRecord, RecordOutcome, RecordStream};
pub use reset::{scope_invalidated, variables_to_reset};
pub use variables::{VariableRuntime, VariableUpdateError};
