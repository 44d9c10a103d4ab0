//! Break classification - the per-record verdict of the group processor
//!
//! One type carries both axes of change: whether the record itself changed
//! and whether (and where) the group hierarchy broke. Produced fresh per
//! record, never persisted.

use serde::{Deserialize, Serialize};

/// Classification of one record relative to its predecessor.
///
/// Levels are ordered outermost = 1, so a smaller broken level is a higher
/// hierarchical break. When several levels differ at once only the
/// smallest differing level is reported; the nested breaks are implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakClassification {
    /// Record is literally identical to its predecessor
    NoChange,
    /// New detail record inside the same group
    DetailChange,
    /// Group key changed; carries the smallest differing level
    GroupChange(u32),
    /// Page transition, triggered by the layout collaborator
    PageChange,
}

impl BreakClassification {
    /// Whether the record differs from its predecessor at all.
    ///
    /// `PageChange` is a layout event, not a record transition, and
    /// reports `false` here.
    pub fn record_changed(&self) -> bool {
        matches!(self, Self::DetailChange | Self::GroupChange(_))
    }

    /// The broken group level, if a group break occurred
    pub fn broken_level(&self) -> Option<u32> {
        match self {
            Self::GroupChange(level) => Some(*level),
            _ => None,
        }
    }

    /// Whether this classification is a group break
    pub fn is_group_change(&self) -> bool {
        matches!(self, Self::GroupChange(_))
    }
}
