//! Evaluation errors for the calculation engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for evaluation operations
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors that can occur while evaluating an expression against a record.
///
/// All of these are returned as values; the only fatal path is the
/// explicit `evaluate_strict` wrapper.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvalError {
    /// Field missing from the record (or from a relationship record)
    #[error("Field not found: {field}")]
    FieldNotFound { field: String },

    /// Relationship missing from the record
    #[error("Relationship not found: {relationship}")]
    RelationshipNotFound { relationship: String },

    /// Relationship present but its value is not a record
    #[error("Invalid relationship {relationship}: expected a record, found {found}")]
    InvalidRelationship { relationship: String, found: String },

    /// Arithmetic over incompatible operand types
    #[error("Invalid arithmetic: {left} {op} {right}")]
    InvalidArithmetic {
        op: String,
        left: String,
        right: String,
    },

    /// Division with a zero divisor
    #[error("Division by zero")]
    DivisionByZero,

    /// Call names a function absent from the registry
    #[error("Unknown function: {name}")]
    UnknownFunction { name: String },

    /// Expression shape the engine does not recognize
    #[error("Unsupported expression: {detail}")]
    UnsupportedExpression { detail: String },

    /// Failure raised by a native function or an internal fault
    #[error("Evaluation error: {message}")]
    EvaluationError { message: String },

    /// Panic payload thrown inside a native function
    #[error("Thrown: {payload}")]
    ThrownError { payload: String },

    /// Cooperative stop requested by a native function
    #[error("Process exit: {reason}")]
    ProcessExit { reason: String },
}

impl EvalError {
    /// Create a field-not-found error
    pub fn field_not_found(field: impl Into<String>) -> Self {
        Self::FieldNotFound {
            field: field.into(),
        }
    }

    /// Create a relationship-not-found error
    pub fn relationship_not_found(relationship: impl Into<String>) -> Self {
        Self::RelationshipNotFound {
            relationship: relationship.into(),
        }
    }

    /// Create an invalid-relationship error
    pub fn invalid_relationship(
        relationship: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::InvalidRelationship {
            relationship: relationship.into(),
            found: found.into(),
        }
    }

    /// Create an invalid-arithmetic error
    pub fn invalid_arithmetic(
        op: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        Self::InvalidArithmetic {
            op: op.into(),
            left: left.into(),
            right: right.into(),
        }
    }

    /// Create an unknown-function error
    pub fn unknown_function(name: impl Into<String>) -> Self {
        Self::UnknownFunction { name: name.into() }
    }

    /// Create an unsupported-expression error
    pub fn unsupported_expression(detail: impl Into<String>) -> Self {
        Self::UnsupportedExpression {
            detail: detail.into(),
        }
    }

    /// Create a generic evaluation error
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::EvaluationError {
            message: message.into(),
        }
    }

    /// Create a thrown error from a captured panic payload
    pub fn thrown(payload: impl Into<String>) -> Self {
        Self::ThrownError {
            payload: payload.into(),
        }
    }

    /// Create a process-exit error
    pub fn process_exit(reason: impl Into<String>) -> Self {
        Self::ProcessExit {
            reason: reason.into(),
        }
    }
}
