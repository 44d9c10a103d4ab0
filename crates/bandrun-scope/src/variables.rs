//! Variable runtime - one stateful aggregator per declared variable
//!
//! Applies each variable's aggregate per record, resetting first when the
//! record's break classification invalidates the variable's scope, in the
//! order the dependency resolver produced. Variable expressions see their
//! sibling variables as fields of an augmented evaluation record, so a
//! dependent variable always reads the value its dependency computed for
//! the same record.

use crate::reset::scope_invalidated;
use bandrun_ast::{AggregateKind, BreakClassification, Record, Value, VariableDefinition};
use bandrun_eval::{CalcEngine, EvalError, EvalResult, apply_arithmetic};
use bandrun_graph::{DependencyGraph, GraphResult};
use indexmap::IndexMap;
use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;

/// A variable that failed to update for one record.
///
/// The failure is isolated: the variable keeps its previous state for the
/// record and every other variable still updates.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
#[error("variable {variable} failed to update: {error}")]
pub struct VariableUpdateError {
    /// Name of the failing variable
    pub variable: String,
    /// The underlying evaluation error
    pub error: EvalError,
}

/// Mutable per-variable aggregate state.
///
/// Owned exclusively by the runtime: created at run start from the
/// declared initial value, mutated per record or explicit reset trigger,
/// discarded with the runtime.
#[derive(Debug, Clone)]
struct VariableState {
    value: Value,
    running_sum: Value,
    running_count: u64,
}

impl VariableState {
    fn fresh(definition: &VariableDefinition) -> Self {
        Self {
            value: definition.initial_value.clone(),
            running_sum: Value::Integer(0),
            running_count: 0,
        }
    }
}

/// Stateful runtime over the declared variables of one report run.
pub struct VariableRuntime {
    engine: CalcEngine,
    definitions: IndexMap<String, VariableDefinition>,
    states: IndexMap<String, VariableState>,
    order: Vec<String>,
}

impl VariableRuntime {
    /// Build the runtime: dependency graph, cycle/completeness check, and
    /// evaluation order are all fixed here, before any record flows.
    pub fn new(variables: Vec<VariableDefinition>, engine: CalcEngine) -> GraphResult<Self> {
        let graph = DependencyGraph::build(&variables);
        let known: Vec<String> = variables.iter().map(|v| v.name.clone()).collect();
        graph.validate_dependencies(&known)?;
        let order = graph.resolve_order()?;

        let mut definitions = IndexMap::with_capacity(variables.len());
        let mut states = IndexMap::with_capacity(variables.len());
        for variable in variables {
            states.insert(variable.name.clone(), VariableState::fresh(&variable));
            definitions.insert(variable.name.clone(), variable);
        }

        Ok(Self {
            engine,
            definitions,
            states,
            order,
        })
    }

    /// The resolver-produced evaluation order
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Declared variable definitions, in declaration order
    pub fn definitions(&self) -> impl Iterator<Item = &VariableDefinition> {
        self.definitions.values()
    }

    /// Current value of one variable
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.states.get(name).map(|state| &state.value)
    }

    /// Snapshot of all current values, in declaration order.
    ///
    /// This is the variable-context map the rendering collaborator reads
    /// for printed totals.
    pub fn values(&self) -> IndexMap<String, Value> {
        self.states
            .iter()
            .map(|(name, state)| (name.clone(), state.value.clone()))
            .collect()
    }

    /// Fold one record into every variable, in resolver order.
    ///
    /// `changes` is the record's break classification list from the group
    /// processor (empty for the first record). Variables whose reset scope
    /// the classification invalidates reset *before* accumulating, so the
    /// broken group's first record starts a fresh aggregate that still
    /// includes itself.
    ///
    /// Returns the per-variable failures; an empty vec means every
    /// variable updated.
    pub fn process_record(
        &mut self,
        changes: &[BreakClassification],
        record: &Record,
    ) -> Vec<VariableUpdateError> {
        // Variables are visible to sibling expressions as fields of the
        // augmented record; dependencies are refreshed in place as the
        // resolver order walks forward.
        let mut scoped: Record = record.clone();
        for (name, state) in &self.states {
            scoped.insert(name.clone(), state.value.clone());
        }

        let mut errors = Vec::new();
        for name in &self.order {
            let Some(definition) = self.definitions.get(name) else {
                continue;
            };
            let Some(state) = self.states.get_mut(name) else {
                continue;
            };

            let needs_reset = changes
                .iter()
                .any(|change| scope_invalidated(&definition.reset_scope, change));

            // Stage the update on a copy: a failing evaluation must leave
            // the variable exactly as it was, reset included.
            let mut staged = if needs_reset {
                VariableState::fresh(definition)
            } else {
                state.clone()
            };

            match accumulate(&self.engine, definition, &mut staged, &scoped) {
                Ok(()) => {
                    *state = staged;
                    scoped.insert(name.clone(), state.value.clone());
                }
                Err(error) => {
                    log::warn!("variable {:?} failed to update: {}", name, error);
                    errors.push(VariableUpdateError {
                        variable: name.clone(),
                        error,
                    });
                }
            }
        }
        errors
    }

    /// Explicit group-break trigger: applies the reset table for
    /// `GroupChange(level)` without consuming a record. For callers that
    /// detect transitions at layout time.
    pub fn handle_group_break(&mut self, level: u32) {
        self.apply_resets(&BreakClassification::GroupChange(level));
    }

    /// Explicit page-break trigger: applies the reset table for
    /// `PageChange` without consuming a record.
    pub fn handle_page_break(&mut self) {
        self.apply_resets(&BreakClassification::PageChange);
    }

    /// Explicit report-level reset: every variable, including
    /// report-scoped ones, returns to its initial value.
    pub fn reset_report(&mut self) {
        for (name, state) in self.states.iter_mut() {
            if let Some(definition) = self.definitions.get(name) {
                *state = VariableState::fresh(definition);
            }
        }
    }

    fn apply_resets(&mut self, classification: &BreakClassification) {
        for (name, state) in self.states.iter_mut() {
            let Some(definition) = self.definitions.get(name) else {
                continue;
            };
            if scope_invalidated(&definition.reset_scope, classification) {
                log::trace!("resetting variable {:?} for {:?}", name, classification);
                *state = VariableState::fresh(definition);
            }
        }
    }
}

/// Apply one record's contribution to a variable's staged state.
///
/// Null contributions are skipped for Sum/Average/Min/Max rather than
/// poisoning the aggregate; Count counts records, not values, and Custom
/// stores whatever the expression produced, null included.
fn accumulate(
    engine: &CalcEngine,
    definition: &VariableDefinition,
    state: &mut VariableState,
    record: &Record,
) -> EvalResult<()> {
    match definition.aggregate {
        AggregateKind::Sum => {
            let value = engine.evaluate(&definition.expression, record)?;
            if !value.is_null() {
                state.value = apply_arithmetic("+", &state.value, &value)?;
            }
        }
        AggregateKind::Count => {
            if let Some(condition) = &definition.condition {
                let gate = engine.evaluate(condition, record)?;
                if !gate.is_truthy() {
                    return Ok(());
                }
            }
            state.value = apply_arithmetic("+", &state.value, &Value::Integer(1))?;
        }
        AggregateKind::Average => {
            let value = engine.evaluate(&definition.expression, record)?;
            if !value.is_null() {
                state.running_sum = apply_arithmetic("+", &state.running_sum, &value)?;
                state.running_count += 1;
                state.value = apply_arithmetic(
                    "/",
                    &state.running_sum,
                    &Value::Integer(state.running_count as i64),
                )?;
            }
        }
        AggregateKind::Min => {
            let value = engine.evaluate(&definition.expression, record)?;
            if should_replace(&state.value, &value, Ordering::Less) {
                state.value = value;
            }
        }
        AggregateKind::Max => {
            let value = engine.evaluate(&definition.expression, record)?;
            if should_replace(&state.value, &value, Ordering::Greater) {
                state.value = value;
            }
        }
        AggregateKind::Custom => {
            state.value = engine.evaluate(&definition.expression, record)?;
        }
    }
    Ok(())
}

fn should_replace(current: &Value, candidate: &Value, wanted: Ordering) -> bool {
    if candidate.is_null() {
        return false;
    }
    if current.is_null() {
        return true;
    }
    candidate.compare(current) == Some(wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bandrun_ast::{Expression, ResetScope};
    use bandrun_graph::GraphError;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn record(fields: &[(&str, Value)]) -> Record {
        fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn amount(n: i64) -> Record {
        record(&[("amount", Value::Integer(n))])
    }

    fn runtime(variables: Vec<VariableDefinition>) -> VariableRuntime {
        VariableRuntime::new(variables, CalcEngine::new()).unwrap()
    }

    #[test]
    fn test_sum_accumulates() {
        let mut rt = runtime(vec![VariableDefinition::sum(
            "total",
            Expression::field("amount"),
        )]);

        rt.process_record(&[], &amount(10));
        rt.process_record(&[BreakClassification::DetailChange], &amount(5));
        assert_eq!(rt.value("total"), Some(&Value::Integer(15)));
    }

    #[test]
    fn test_sum_skips_nulls() {
        let mut rt = runtime(vec![VariableDefinition::sum(
            "total",
            Expression::field("amount"),
        )]);

        rt.process_record(&[], &amount(10));
        rt.process_record(
            &[BreakClassification::DetailChange],
            &record(&[("amount", Value::Null)]),
        );
        assert_eq!(rt.value("total"), Some(&Value::Integer(10)));
    }

    #[test]
    fn test_count_with_condition() {
        let mut rt = runtime(vec![
            VariableDefinition::count("all", Expression::field("amount")),
            VariableDefinition::count("paid", Expression::field("amount"))
                .with_condition(Expression::field("paid")),
        ]);

        rt.process_record(
            &[],
            &record(&[("amount", Value::Integer(1)), ("paid", Value::Boolean(true))]),
        );
        rt.process_record(
            &[BreakClassification::DetailChange],
            &record(&[("amount", Value::Integer(2)), ("paid", Value::Boolean(false))]),
        );

        assert_eq!(rt.value("all"), Some(&Value::Integer(2)));
        assert_eq!(rt.value("paid"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_average_running_values() {
        let mut rt = runtime(vec![VariableDefinition::average(
            "avg",
            Expression::field("amount"),
        )]);

        let mut seen = Vec::new();
        for n in [10, 20, 30] {
            rt.process_record(&[], &amount(n));
            seen.push(rt.value("avg").cloned().unwrap());
        }
        assert_eq!(
            seen,
            vec![
                Value::Decimal(Decimal::from(10)),
                Value::Decimal(Decimal::from(15)),
                Value::Decimal(Decimal::from(20)),
            ]
        );
    }

    #[test]
    fn test_min_max() {
        let mut rt = runtime(vec![
            VariableDefinition::min("cheapest", Expression::field("amount")),
            VariableDefinition::max("priciest", Expression::field("amount")),
        ]);

        for n in [7, 3, 9] {
            rt.process_record(&[], &amount(n));
        }
        assert_eq!(rt.value("cheapest"), Some(&Value::Integer(3)));
        assert_eq!(rt.value("priciest"), Some(&Value::Integer(9)));
    }

    #[test]
    fn test_custom_is_last_write() {
        let mut rt = runtime(vec![VariableDefinition::custom(
            "latest",
            Expression::field("amount"),
        )]);

        rt.process_record(&[], &amount(1));
        rt.process_record(&[], &amount(99));
        assert_eq!(rt.value("latest"), Some(&Value::Integer(99)));
    }

    #[test]
    fn test_reset_before_accumulate_includes_breaking_record() {
        // Sum reset at group level 1, key changing every record: the
        // aggregate must hold only the current record's value, never
        // compound across a break.
        let mut rt = runtime(vec![
            VariableDefinition::sum("group_total", Expression::field("amount"))
                .with_reset_scope(ResetScope::Group(1)),
        ]);

        rt.process_record(&[], &amount(10));
        assert_eq!(rt.value("group_total"), Some(&Value::Integer(10)));

        rt.process_record(&[BreakClassification::GroupChange(1)], &amount(7));
        assert_eq!(rt.value("group_total"), Some(&Value::Integer(7)));

        rt.process_record(&[BreakClassification::GroupChange(1)], &amount(3));
        assert_eq!(rt.value("group_total"), Some(&Value::Integer(3)));
    }

    #[test]
    fn test_detail_scope_resets_on_every_record_change() {
        let mut rt = runtime(vec![
            VariableDefinition::sum("per_record", Expression::field("amount"))
                .with_reset_scope(ResetScope::Detail),
        ]);

        rt.process_record(&[], &amount(4));
        rt.process_record(&[BreakClassification::DetailChange], &amount(6));
        assert_eq!(rt.value("per_record"), Some(&Value::Integer(6)));
    }

    #[test]
    fn test_dependent_variable_sees_fresh_dependency() {
        // "doubled" reads the value "total" computed for the same record;
        // resolver order guarantees total updates first.
        let mut rt = runtime(vec![
            VariableDefinition::custom(
                "doubled",
                Expression::call(
                    "*",
                    vec![Expression::field("total"), Expression::literal(2)],
                ),
            ),
            VariableDefinition::sum("total", Expression::field("amount")),
        ]);
        assert_eq!(rt.order(), ["total", "doubled"]);

        rt.process_record(&[], &amount(10));
        assert_eq!(rt.value("doubled"), Some(&Value::Integer(20)));

        rt.process_record(&[BreakClassification::DetailChange], &amount(5));
        assert_eq!(rt.value("doubled"), Some(&Value::Integer(30)));
    }

    #[test]
    fn test_cyclic_variables_rejected_up_front() {
        let result = VariableRuntime::new(
            vec![
                VariableDefinition::custom("a", Expression::field("b")),
                VariableDefinition::custom("b", Expression::field("a")),
            ],
            CalcEngine::new(),
        );
        assert!(matches!(
            result,
            Err(GraphError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_one_failure_does_not_block_siblings() {
        let mut rt = runtime(vec![
            VariableDefinition::sum("broken", Expression::field("missing")),
            VariableDefinition::sum("healthy", Expression::field("amount")),
        ]);

        let errors = rt.process_record(&[], &amount(10));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].variable, "broken");
        assert_eq!(rt.value("healthy"), Some(&Value::Integer(10)));
        // Failed variable keeps its prior state
        assert_eq!(rt.value("broken"), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_explicit_break_triggers() {
        let mut rt = runtime(vec![
            VariableDefinition::sum("group2", Expression::field("amount"))
                .with_reset_scope(ResetScope::Group(2)),
            VariableDefinition::sum("page", Expression::field("amount"))
                .with_reset_scope(ResetScope::Page),
            VariableDefinition::sum("report", Expression::field("amount"))
                .with_reset_scope(ResetScope::Report),
        ]);

        rt.process_record(&[], &amount(10));

        // Break at level 1 resets the nested level-2 variable, not page
        rt.handle_group_break(1);
        assert_eq!(rt.value("group2"), Some(&Value::Integer(0)));
        assert_eq!(rt.value("page"), Some(&Value::Integer(10)));

        rt.handle_page_break();
        assert_eq!(rt.value("page"), Some(&Value::Integer(0)));
        assert_eq!(rt.value("report"), Some(&Value::Integer(10)));

        rt.reset_report();
        assert_eq!(rt.value("report"), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_values_snapshot_in_declaration_order() {
        let mut rt = runtime(vec![
            VariableDefinition::sum("zulu", Expression::field("amount")),
            VariableDefinition::count("alpha", Expression::field("amount")),
        ]);
        rt.process_record(&[], &amount(10));

        let names: Vec<String> = rt.values().keys().cloned().collect();
        assert_eq!(names, ["zulu", "alpha"]);
    }
}
