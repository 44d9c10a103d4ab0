//! Calculation engine
//!
//! Evaluates one scalar `Expression` against one record and returns a
//! value or a typed error. The engine is stateless apart from its injected
//! function registry; all mutation during a report run happens in the
//! scope and variable layers built on top of it.

use crate::error::{EvalError, EvalResult};
use crate::registry::FunctionRegistry;
use bandrun_ast::{Expression, NativeFault, NativeFunction, Record, Value};
use rust_decimal::Decimal;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// The calculation engine.
///
/// Holds the run-scoped function registry consulted for `Call` expressions
/// that are not built-in operators.
#[derive(Default, Clone)]
pub struct CalcEngine {
    registry: FunctionRegistry,
}

impl CalcEngine {
    /// Create an engine with an empty function registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with a pre-populated registry
    pub fn with_registry(registry: FunctionRegistry) -> Self {
        Self { registry }
    }

    /// Get a mutable reference to the registry
    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    /// Get the registry
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Evaluate an expression against a record.
    ///
    /// Never panics; every failure mode, including panics inside native
    /// functions, comes back as a typed `EvalError`.
    pub fn evaluate(&self, expr: &Expression, record: &Record) -> EvalResult<Value> {
        match expr {
            Expression::FieldRef(name) => record
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::field_not_found(name)),

            Expression::RelationshipField { path, field } => {
                self.eval_relationship_path(path, field, record)
            }

            Expression::ExplicitField {
                relationship,
                field,
            } => self.eval_relationship_path(std::slice::from_ref(relationship), field, record),

            Expression::Literal(value) => Ok(value.clone()),

            Expression::Nil => Ok(Value::Null),

            Expression::Native(function) => self.eval_native(function, record),

            Expression::Call { op, args } => match op.as_str() {
                "+" | "-" | "*" | "/" => self.eval_arithmetic(op, args, record),
                "if" => self.eval_if(args, record),
                name => self.eval_registry_call(name, args, record),
            },
        }
    }

    /// Fail-fast variant of [`evaluate`](Self::evaluate).
    ///
    /// # Panics
    ///
    /// Panics on any evaluation error. Opt in only where a bad expression
    /// means the caller's configuration is broken beyond recovery;
    /// everything else should use `evaluate`.
    #[track_caller]
    pub fn evaluate_strict(&self, expr: &Expression, record: &Record) -> Value {
        match self.evaluate(expr, record) {
            Ok(value) => value,
            Err(err) => panic!("expression evaluation failed: {}", err),
        }
    }

    /// Structural well-formedness check, independent of any record.
    ///
    /// Rejects shapes `evaluate` would not understand: empty names, wrong
    /// operator arity, empty relationship paths. Recurses into children.
    pub fn validate(&self, expr: &Expression) -> EvalResult<()> {
        match expr {
            Expression::FieldRef(name) => {
                if name.is_empty() {
                    return Err(EvalError::unsupported_expression("empty field name"));
                }
                Ok(())
            }
            Expression::RelationshipField { path, field } => {
                if path.is_empty() {
                    return Err(EvalError::unsupported_expression(
                        "relationship path is empty",
                    ));
                }
                if path.iter().any(String::is_empty) || field.is_empty() {
                    return Err(EvalError::unsupported_expression(
                        "empty name in relationship reference",
                    ));
                }
                Ok(())
            }
            Expression::ExplicitField {
                relationship,
                field,
            } => {
                if relationship.is_empty() || field.is_empty() {
                    return Err(EvalError::unsupported_expression(
                        "empty name in relationship reference",
                    ));
                }
                Ok(())
            }
            Expression::Literal(_) | Expression::Nil | Expression::Native(_) => Ok(()),
            Expression::Call { op, args } => {
                match op.as_str() {
                    "" => {
                        return Err(EvalError::unsupported_expression("empty operator name"));
                    }
                    "+" | "-" | "*" | "/" if args.len() != 2 => {
                        return Err(EvalError::unsupported_expression(format!(
                            "operator {} takes 2 arguments, got {}",
                            op,
                            args.len()
                        )));
                    }
                    "if" if args.len() != 3 => {
                        return Err(EvalError::unsupported_expression(format!(
                            "if takes 3 arguments, got {}",
                            args.len()
                        )));
                    }
                    _ => {}
                }
                for arg in args {
                    self.validate(arg)?;
                }
                Ok(())
            }
        }
    }

    fn eval_relationship_path(
        &self,
        path: &[String],
        field: &str,
        record: &Record,
    ) -> EvalResult<Value> {
        let mut current = record;
        for hop in path {
            let value = current
                .get(hop)
                .ok_or_else(|| EvalError::relationship_not_found(hop))?;
            current = value
                .as_record()
                .ok_or_else(|| EvalError::invalid_relationship(hop, value.type_name()))?;
        }
        current
            .get(field)
            .cloned()
            .ok_or_else(|| EvalError::field_not_found(field))
    }

    /// Invoke a native function behind the panic-capture boundary.
    ///
    /// No fault class raised inside the closure crosses the engine
    /// boundary uncaught.
    fn eval_native(&self, function: &NativeFunction, record: &Record) -> EvalResult<Value> {
        let outcome = catch_unwind(AssertUnwindSafe(|| function.call(record)));
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(NativeFault::Message(message))) => Err(EvalError::evaluation(message)),
            Ok(Err(NativeFault::Exit(reason))) => Err(EvalError::process_exit(reason)),
            Err(payload) => {
                if let Some(s) = payload.downcast_ref::<&'static str>() {
                    Err(EvalError::thrown(*s))
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    Err(EvalError::thrown(s.clone()))
                } else {
                    Err(EvalError::evaluation(
                        "native function panicked with a non-string payload",
                    ))
                }
            }
        }
    }

    fn eval_arithmetic(&self, op: &str, args: &[Expression], record: &Record) -> EvalResult<Value> {
        if args.len() != 2 {
            return Err(EvalError::unsupported_expression(format!(
                "operator {} takes 2 arguments, got {}",
                op,
                args.len()
            )));
        }
        let left = self.evaluate(&args[0], record)?;
        let right = self.evaluate(&args[1], record)?;
        apply_arithmetic(op, &left, &right)
    }

    /// `if(cond, then, else)`: operands resolve eagerly, only `false` and
    /// `null` are falsy, and the already-resolved branch value is returned.
    fn eval_if(&self, args: &[Expression], record: &Record) -> EvalResult<Value> {
        if args.len() != 3 {
            return Err(EvalError::unsupported_expression(format!(
                "if takes 3 arguments, got {}",
                args.len()
            )));
        }
        let cond = self.evaluate(&args[0], record)?;
        let then_value = self.evaluate(&args[1], record)?;
        let else_value = self.evaluate(&args[2], record)?;
        Ok(if cond.is_truthy() {
            then_value
        } else {
            else_value
        })
    }

    fn eval_registry_call(
        &self,
        name: &str,
        args: &[Expression],
        record: &Record,
    ) -> EvalResult<Value> {
        let resolved: Vec<Value> = args
            .iter()
            .map(|arg| self.evaluate(arg, record))
            .collect::<EvalResult<_>>()?;
        let function = self
            .registry
            .get_function(name)
            .ok_or_else(|| EvalError::unknown_function(name))?;
        function(&resolved, record)
    }
}

/// Apply a binary arithmetic operator to two resolved values.
///
/// Integer pairs stay integral except for division, which always produces
/// a `Decimal` so it never truncates. Any decimal operand promotes the
/// whole operation to `Decimal`. `+` on two strings concatenates.
pub fn apply_arithmetic(op: &str, left: &Value, right: &Value) -> EvalResult<Value> {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        if op == "+" {
            return Ok(Value::String(format!("{}{}", a, b)));
        }
        return Err(mismatch(op, left, right));
    }

    let (Some(a), Some(b)) = (left.as_decimal(), right.as_decimal()) else {
        return Err(mismatch(op, left, right));
    };

    if op == "/" {
        if b.is_zero() {
            return Err(EvalError::DivisionByZero);
        }
        return a
            .checked_div(b)
            .map(Value::Decimal)
            .ok_or_else(|| EvalError::evaluation("decimal overflow in \"/\""));
    }

    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        let result = match op {
            "+" => a.checked_add(*b),
            "-" => a.checked_sub(*b),
            "*" => a.checked_mul(*b),
            _ => return Err(mismatch(op, left, right)),
        };
        return result
            .map(Value::Integer)
            .ok_or_else(|| EvalError::evaluation(format!("integer overflow in \"{}\"", op)));
    }

    let result = match op {
        "+" => a.checked_add(b),
        "-" => a.checked_sub(b),
        "*" => a.checked_mul(b),
        _ => return Err(mismatch(op, left, right)),
    };
    result
        .map(Value::Decimal)
        .ok_or_else(|| EvalError::evaluation(format!("decimal overflow in \"{}\"", op)))
}

fn mismatch(op: &str, left: &Value, right: &Value) -> EvalError {
    EvalError::invalid_arithmetic(op, left.to_string(), right.to_string())
}

/// Static analysis: flat field names an expression references.
///
/// Relationship references contribute their root relationship name, which
/// is what the data-loading collaborator needs to decide preloads. Names
/// are deduplicated in first-occurrence order. Native functions are opaque
/// and contribute nothing.
pub fn extract_field_references(expr: &Expression) -> Vec<String> {
    let mut names = Vec::new();
    collect_field_references(expr, &mut names);
    names
}

fn collect_field_references(expr: &Expression, names: &mut Vec<String>) {
    let mut push = |name: &str| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };
    match expr {
        Expression::FieldRef(name) => push(name),
        Expression::RelationshipField { path, .. } => {
            if let Some(root) = path.first() {
                push(root);
            }
        }
        Expression::ExplicitField { relationship, .. } => push(relationship),
        Expression::Call { args, .. } => {
            for arg in args {
                collect_field_references(arg, names);
            }
        }
        Expression::Literal(_) | Expression::Native(_) | Expression::Nil => {}
    }
}
