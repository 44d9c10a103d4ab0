//! Report run orchestrator
//!
//! Wires the group processor and the variable runtime together the way a
//! report execution consumes them: per record, the processor classifies
//! the break, then the runtime resets whatever the break invalidates and
//! accumulates the record's contribution. The rendering collaborator
//! reads the returned steps and the snapshot accessors.

use bandrun_ast::{GroupDefinition, Record, Value, VariableDefinition};
use bandrun_eval::{CalcEngine, FunctionRegistry};
use bandrun_graph::GraphResult;
use bandrun_scope::{GroupProcessor, RecordOutcome, VariableRuntime, VariableUpdateError};
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Everything a consumer needs about one processed record.
#[derive(Debug)]
pub struct ReportStep {
    /// Break classification, group values, and reset flag for the record
    pub outcome: RecordOutcome,
    /// Variables that failed to update for this record (empty when all
    /// succeeded); failures never abort the run
    pub variable_errors: Vec<VariableUpdateError>,
}

/// One report execution over one ordered record stream.
///
/// Owns the scope state and the variable states exclusively; concurrent
/// reports each construct their own run. Construction fails fast on a
/// cyclic or incomplete variable dependency graph - a run must never
/// start with one.
pub struct ReportRun {
    processor: GroupProcessor,
    variables: VariableRuntime,
}

impl ReportRun {
    /// Create a run from resolved definitions and a calculation engine.
    ///
    /// The engine (and its function registry) is shared by group-key
    /// projection and variable evaluation.
    pub fn new(
        groups: Vec<GroupDefinition>,
        variables: Vec<VariableDefinition>,
        engine: CalcEngine,
    ) -> GraphResult<Self> {
        let runtime = VariableRuntime::new(variables, engine.clone())?;
        log::debug!(
            "report run ready: {} groups, evaluation order {:?}",
            groups.len(),
            runtime.order()
        );
        Ok(Self {
            processor: GroupProcessor::new(groups, engine),
            variables: runtime,
        })
    }

    /// Create a run with a pre-populated function registry
    pub fn with_registry(
        groups: Vec<GroupDefinition>,
        variables: Vec<VariableDefinition>,
        registry: FunctionRegistry,
    ) -> GraphResult<Self> {
        Self::new(groups, variables, CalcEngine::with_registry(registry))
    }

    /// Process one record: classify the break, schedule resets, accumulate.
    pub fn process_record(&mut self, record: Record) -> ReportStep {
        let outcome = self.processor.process_record(record);
        let variable_errors = self
            .variables
            .process_record(&outcome.group_changes, &outcome.record);
        ReportStep {
            outcome,
            variable_errors,
        }
    }

    /// Drain an entire record stream, in order.
    pub fn run(&mut self, records: impl IntoIterator<Item = Record>) -> Vec<ReportStep> {
        records
            .into_iter()
            .map(|record| self.process_record(record))
            .collect()
    }

    /// Page transition: advances the page number and resets page-scoped
    /// (and narrower) variables.
    pub fn page_break(&mut self) {
        self.processor.page_break();
        self.variables.handle_page_break();
    }

    /// Restart the run: clears the scan state and returns every variable,
    /// report-scoped ones included, to its initial value.
    pub fn reset(&mut self) {
        self.processor.reset();
        self.variables.reset_report();
    }

    /// Current value of one variable
    pub fn variable_value(&self, name: &str) -> Option<&Value> {
        self.variables.value(name)
    }

    /// Snapshot of all variable values, in declaration order
    pub fn variable_context(&self) -> IndexMap<String, Value> {
        self.variables.values()
    }

    /// Current group key values by level
    pub fn group_values(&self) -> &BTreeMap<u32, Value> {
        self.processor.group_values()
    }

    /// Current page number
    pub fn page_number(&self) -> u32 {
        self.processor.page_number()
    }

    /// Detail records processed so far
    pub fn detail_count(&self) -> u64 {
        self.processor.detail_count()
    }
}
