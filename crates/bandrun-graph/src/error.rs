//! Dependency resolution errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors produced by dependency analysis.
///
/// A run must not start with a cyclic or incomplete dependency graph, so
/// these surface at construction time, before any record is processed.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphError {
    /// Variables reference each other in a cycle
    #[error("circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency {
        /// Participants, in traversal order; the first node repeats at the
        /// end when a full path could be reconstructed
        cycle: Vec<String>,
    },

    /// Edges point at variables nobody declared
    #[error("missing dependencies: {}", .missing.join(", "))]
    MissingDependencies {
        /// Unknown edge targets, in first-occurrence order
        missing: Vec<String>,
    },
}

impl GraphError {
    /// Create a circular-dependency error
    pub fn circular(cycle: Vec<String>) -> Self {
        Self::CircularDependency { cycle }
    }

    /// Create a missing-dependencies error
    pub fn missing(missing: Vec<String>) -> Self {
        Self::MissingDependencies { missing }
    }
}
