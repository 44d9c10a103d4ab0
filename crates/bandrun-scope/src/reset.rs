//! Variable reset scheduling
//!
//! Maps a break classification to the set of variables whose reset scope
//! it invalidates. The sets are monotone: everything a detail change
//! resets is also reset by a group change, and everything a group change
//! resets is also reset by a page change. Report-scoped variables never
//! appear here; they reset only through an explicit report-level reset.

use bandrun_ast::{BreakClassification, ResetScope, VariableDefinition};

/// Whether a classification invalidates a reset scope.
///
/// `GroupChange(L)` invalidates the broken level and everything nested
/// inside it (declared level >= L).
pub fn scope_invalidated(scope: &ResetScope, classification: &BreakClassification) -> bool {
    match (scope, classification) {
        (ResetScope::Detail, c) => c.record_changed() || *c == BreakClassification::PageChange,
        (ResetScope::Group(declared), BreakClassification::GroupChange(broken)) => {
            declared >= broken
        }
        (ResetScope::Group(_), BreakClassification::PageChange) => true,
        (ResetScope::Page, BreakClassification::PageChange) => true,
        _ => false,
    }
}

/// The variables a classification resets, in declaration order.
pub fn variables_to_reset<'a>(
    variables: &'a [VariableDefinition],
    classification: &BreakClassification,
) -> Vec<&'a VariableDefinition> {
    variables
        .iter()
        .filter(|variable| scope_invalidated(&variable.reset_scope, classification))
        .collect()
}
