//! Expression AST nodes
//!
//! The tagged expression union evaluated against one record at a time.
//! Expressions arrive fully resolved from the DSL-compilation collaborator;
//! this crate only models their shape. Unrecognized or malformed shapes are
//! rejected by `bandrun-eval`'s `validate`, never silently evaluated.

use crate::value::{Record, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A fault signalled by a native function, before panic capture.
///
/// Native hooks return `Message` for an ordinary failure and `Exit` to
/// request that the run stop. Panics raised inside the hook are a third
/// fault channel, captured at the evaluation boundary.
#[derive(Debug, Clone, Error)]
pub enum NativeFault {
    /// Ordinary failure with a message
    #[error("{0}")]
    Message(String),
    /// Cooperative request to stop the run
    #[error("exit: {0}")]
    Exit(String),
}

/// Closure signature for native function expressions
pub type NativeFn = dyn Fn(&Record) -> Result<Value, NativeFault> + Send + Sync;

/// A user-supplied native function invoked with the current record.
///
/// Wraps the closure in an `Arc` so expressions stay cheaply cloneable.
#[derive(Clone)]
pub struct NativeFunction(Arc<NativeFn>);

impl NativeFunction {
    /// Wrap a closure as a native function expression
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Record) -> Result<Value, NativeFault> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Invoke the closure with the given record.
    ///
    /// Callers that need panic safety must wrap this in a capture boundary;
    /// `bandrun-eval` does.
    pub fn call(&self, record: &Record) -> Result<Value, NativeFault> {
        (self.0)(record)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NativeFunction(..)")
    }
}

/// All expression forms understood by the calculation engine
#[derive(Debug, Clone)]
pub enum Expression {
    /// Direct field lookup on the record
    FieldRef(String),

    /// Field lookup through one or more nested relationships.
    ///
    /// `path` names the relationships to traverse, outermost first; each
    /// hop must resolve to a `Value::Record`.
    RelationshipField {
        /// Relationship names, traversed in order
        path: Vec<String>,
        /// Field looked up on the innermost relationship
        field: String,
    },

    /// Single-hop relationship field in the shape emitted by upstream
    /// query builders. Recognized structurally, kept as its own variant so
    /// the evaluator stays decoupled from any builder's node types.
    ExplicitField {
        /// Relationship name
        relationship: String,
        /// Field on the relationship record
        field: String,
    },

    /// Constant value, returned unchanged (including `Null` and composites)
    Literal(Value),

    /// Operator or registry function application
    Call {
        /// Operator name (`"+"`, `"if"`, or a registered function name)
        op: String,
        /// Argument expressions, resolved recursively
        args: Vec<Expression>,
    },

    /// User-supplied closure invoked with the record
    Native(NativeFunction),

    /// The nil expression; evaluates to `Value::Null`
    Nil,
}

impl Expression {
    /// Build a field reference
    pub fn field(name: impl Into<String>) -> Self {
        Self::FieldRef(name.into())
    }

    /// Build a single-hop relationship field reference
    pub fn relationship_field(
        relationship: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::RelationshipField {
            path: vec![relationship.into()],
            field: field.into(),
        }
    }

    /// Build an explicit (query-builder shaped) relationship field reference
    pub fn explicit_field(relationship: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ExplicitField {
            relationship: relationship.into(),
            field: field.into(),
        }
    }

    /// Build a literal expression
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Build an operator/function call
    pub fn call(op: impl Into<String>, args: Vec<Expression>) -> Self {
        Self::Call {
            op: op.into(),
            args,
        }
    }

    /// Build an `if` conditional
    pub fn if_else(cond: Expression, then: Expression, otherwise: Expression) -> Self {
        Self::call("if", vec![cond, then, otherwise])
    }

    /// Build a native function expression
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&Record) -> Result<Value, NativeFault> + Send + Sync + 'static,
    {
        Self::Native(NativeFunction::new(f))
    }
}
