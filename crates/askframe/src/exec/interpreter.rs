// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Gas-metered tree-walking evaluation of parsed snippets. Every node
//! visit and every element of vectorised work charges the meter, so a
//! pathological snippet runs out of gas instead of out of patience.

use crate::dataset::{CellValue, DataFrame};
use crate::exec::helpers::{HelperCtx, HelperRegistry};
use crate::lang::ast::{AstNode, BinaryOp, Expr, Literal, Snippet, Span, Stmt, UnaryOp};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("Evaluation exceeded the gas limit")]
    OutOfGas,
    #[error("Division by zero at {span}")]
    DivisionByZero { span: Span },
    #[error("Type mismatch at {span}: expected {expected}, found {found}")]
    TypeMismatch {
        expected: String,
        found: String,
        span: Span,
    },
    #[error("Variable '{name}' is not defined at {span}")]
    VariableNotFound { name: String, span: Span },
    #[error("Frame '{frame}' has no column '{column}' at {span}")]
    ColumnNotFound {
        frame: String,
        column: String,
        span: Span,
    },
    #[error("Helper '{helper}' expects {expected} argument(s), got {found}")]
    BadArity {
        helper: String,
        expected: String,
        found: usize,
    },
    #[error("Helper '{name}' is not registered")]
    HelperNotFound { name: String },
    #[error("Invalid operation at {span}: {detail}")]
    InvalidOperation { detail: String, span: Span },
}

impl EvalError {
    pub fn invalid(detail: impl Into<String>, span: Span) -> Self {
        EvalError::InvalidOperation {
            detail: detail.into(),
            span,
        }
    }
}

/// Runtime value inside the execution namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Frame(Arc<DataFrame>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Frame(_) => "frame",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Frame(frame) => frame.row_count() > 0,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn from_cell(cell: CellValue) -> Self {
        match cell {
            CellValue::Null => Value::Null,
            CellValue::Int(i) => Value::Int(i),
            CellValue::Float(f) => Value::Float(f),
            CellValue::Str(s) => Value::Str(s),
            CellValue::Bool(b) => Value::Bool(b),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::json!(b),
            Value::Int(i) => serde_json::json!(i),
            Value::Float(f) => serde_json::json!(f),
            Value::Str(s) => serde_json::json!(s),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
            Value::Frame(frame) => frame.to_json(),
        }
    }

    /// Human rendering used by the captured `print` helper.
    pub fn render(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::List(items) => {
                let rendered: Vec<String> = items.iter().map(|v| v.render()).collect();
                format!("[{}]", rendered.join(", "))
            }
            Value::Frame(frame) => format!(
                "<frame '{}': {} rows x {} columns>",
                frame.name(),
                frame.row_count(),
                frame.column_count()
            ),
        }
    }
}

/// Step budget for one snippet evaluation.
#[derive(Debug)]
pub struct GasMeter {
    limit: u64,
    remaining: u64,
}

impl GasMeter {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            remaining: limit,
        }
    }

    pub fn charge(&mut self, amount: u64) -> Result<(), EvalError> {
        if amount > self.remaining {
            self.remaining = 0;
            return Err(EvalError::OutOfGas);
        }
        self.remaining -= amount;
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.limit - self.remaining
    }
}

/// Everything the interpreter produced for one snippet. Output and gas
/// are reported even when evaluation fails partway through.
#[derive(Debug)]
pub struct EvalOutcome {
    pub result: Result<Value, EvalError>,
    pub output: Vec<String>,
    pub gas_used: u64,
}

pub struct Interpreter<'a> {
    namespace: HashMap<String, Value>,
    helpers: &'a HelperRegistry,
    gas: GasMeter,
    output: Vec<String>,
}

impl<'a> Interpreter<'a> {
    /// The namespace starts out holding only the dataset snapshots; helper
    /// functions live in the registry, not as assignable values.
    pub fn new(
        bindings: HashMap<String, Arc<DataFrame>>,
        helpers: &'a HelperRegistry,
        gas_limit: u64,
    ) -> Self {
        let namespace = bindings
            .into_iter()
            .map(|(name, frame)| (name, Value::Frame(frame)))
            .collect();
        Self {
            namespace,
            helpers,
            gas: GasMeter::new(gas_limit),
            output: Vec::new(),
        }
    }

    /// Evaluate the snippet; the result is the value of the final
    /// statement (an assignment's value counts).
    pub fn run(mut self, snippet: &Snippet) -> EvalOutcome {
        let result = self.execute(snippet);
        EvalOutcome {
            result,
            output: self.output,
            gas_used: self.gas.used(),
        }
    }

    fn execute(&mut self, snippet: &Snippet) -> Result<Value, EvalError> {
        let mut last = Value::Null;
        for stmt in &snippet.statements {
            self.gas.charge(1)?;
            last = match stmt {
                Stmt::Assign { name, value, .. } => {
                    let evaluated = self.eval(value)?;
                    self.namespace.insert(name.clone(), evaluated.clone());
                    evaluated
                }
                Stmt::Expr(node) => self.eval(node)?,
            };
        }
        Ok(last)
    }

    fn eval(&mut self, node: &AstNode) -> Result<Value, EvalError> {
        self.gas.charge(1)?;
        match &node.expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Ident(name) => {
                self.namespace
                    .get(name)
                    .cloned()
                    .ok_or_else(|| EvalError::VariableNotFound {
                        name: name.clone(),
                        span: node.span,
                    })
            }
            Expr::List(items) => {
                self.gas.charge(items.len() as u64)?;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::List(values))
            }
            Expr::Attribute { base, name } => {
                let base_value = self.eval(base)?;
                self.project_column(&base_value, name, node.span)
            }
            Expr::Index { base, index } => {
                let base_value = self.eval(base)?;
                let index_value = self.eval(index)?;
                self.index(&base_value, &index_value, node.span)
            }
            Expr::Call { name, args } => {
                let helper = self
                    .helpers
                    .get(name)
                    .ok_or_else(|| EvalError::HelperNotFound { name: name.clone() })?;
                self.gas.charge(10)?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg)?);
                }
                let mut ctx = HelperCtx {
                    gas: &mut self.gas,
                    output: &mut self.output,
                    span: node.span,
                };
                helper(&evaluated, &mut ctx)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                self.eval_unary(*op, value, node.span)
            }
            Expr::Binary { op, left, right } => {
                let lhs = self.eval(left)?;
                // Scalar and/or short-circuits; vectorised forms need the
                // right-hand side regardless.
                if !matches!(lhs, Value::List(_)) {
                    match op {
                        BinaryOp::And if !lhs.is_truthy() => return Ok(Value::Bool(false)),
                        BinaryOp::Or if lhs.is_truthy() => return Ok(Value::Bool(true)),
                        _ => {}
                    }
                }
                let rhs = self.eval(right)?;
                self.eval_binary(*op, lhs, rhs, node.span)
            }
            Expr::Conditional {
                value,
                condition,
                fallback,
            } => {
                let chosen = self.eval(condition)?;
                if chosen.is_truthy() {
                    self.eval(value)
                } else {
                    self.eval(fallback)
                }
            }
        }
    }

    fn project_column(&mut self, base: &Value, name: &str, span: Span) -> Result<Value, EvalError> {
        let frame = match base {
            Value::Frame(frame) => frame,
            other => {
                return Err(EvalError::TypeMismatch {
                    expected: "frame".to_string(),
                    found: other.type_name().to_string(),
                    span,
                })
            }
        };
        if !frame.has_column(name) {
            return Err(EvalError::ColumnNotFound {
                frame: frame.name().to_string(),
                column: name.to_string(),
                span,
            });
        }
        self.gas.charge(frame.row_count() as u64)?;
        let values = (0..frame.row_count())
            .map(|row| {
                frame
                    .cell(name, row)
                    .map_or(Value::Null, Value::from_cell)
            })
            .collect();
        Ok(Value::List(values))
    }

    fn index(&mut self, base: &Value, index: &Value, span: Span) -> Result<Value, EvalError> {
        let position = match index {
            Value::Int(i) => *i,
            other => {
                return Err(EvalError::TypeMismatch {
                    expected: "integer index".to_string(),
                    found: other.type_name().to_string(),
                    span,
                })
            }
        };
        match base {
            Value::List(items) => {
                let len = items.len() as i64;
                let resolved = if position < 0 { len + position } else { position };
                if resolved < 0 || resolved >= len {
                    return Err(EvalError::invalid(
                        format!("Index {position} out of range for list of {len}"),
                        span,
                    ));
                }
                Ok(items[resolved as usize].clone())
            }
            other => Err(EvalError::TypeMismatch {
                expected: "list".to_string(),
                found: other.type_name().to_string(),
                span,
            }),
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, value: Value, span: Span) -> Result<Value, EvalError> {
        if let Value::List(items) = value {
            self.gas.charge(items.len() as u64)?;
            let mapped: Result<Vec<Value>, EvalError> = items
                .into_iter()
                .map(|item| self.scalar_unary(op, item, span))
                .collect();
            return Ok(Value::List(mapped?));
        }
        self.scalar_unary(op, value, span)
    }

    fn scalar_unary(&self, op: UnaryOp, value: Value, span: Span) -> Result<Value, EvalError> {
        match (op, value) {
            (UnaryOp::Negate, Value::Int(i)) => Ok(Value::Int(i.saturating_neg())),
            (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Negate, Value::Null) => Ok(Value::Null),
            (UnaryOp::Negate, other) => Err(EvalError::TypeMismatch {
                expected: "number".to_string(),
                found: other.type_name().to_string(),
                span,
            }),
            (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
        }
    }

    /// Binary application with elementwise broadcasting: a list on either
    /// side maps the operation across elements, which is how column
    /// expressions like `orders.qty > 3` become boolean masks.
    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: Value,
        right: Value,
        span: Span,
    ) -> Result<Value, EvalError> {
        match (left, right) {
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    return Err(EvalError::invalid(
                        format!("List lengths differ: {} vs {}", a.len(), b.len()),
                        span,
                    ));
                }
                self.gas.charge(a.len() as u64)?;
                let mapped: Result<Vec<Value>, EvalError> = a
                    .into_iter()
                    .zip(b)
                    .map(|(x, y)| self.scalar_binary(op, x, y, span))
                    .collect();
                Ok(Value::List(mapped?))
            }
            (Value::List(a), scalar) => {
                self.gas.charge(a.len() as u64)?;
                let mapped: Result<Vec<Value>, EvalError> = a
                    .into_iter()
                    .map(|x| self.scalar_binary(op, x, scalar.clone(), span))
                    .collect();
                Ok(Value::List(mapped?))
            }
            (scalar, Value::List(b)) => {
                self.gas.charge(b.len() as u64)?;
                let mapped: Result<Vec<Value>, EvalError> = b
                    .into_iter()
                    .map(|y| self.scalar_binary(op, scalar.clone(), y, span))
                    .collect();
                Ok(Value::List(mapped?))
            }
            (left, right) => self.scalar_binary(op, left, right, span),
        }
    }

    fn scalar_binary(
        &self,
        op: BinaryOp,
        left: Value,
        right: Value,
        span: Span,
    ) -> Result<Value, EvalError> {
        use BinaryOp::*;
        match op {
            And => return Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
            Or => return Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
            Equal => return Ok(Value::Bool(left == right)),
            NotEqual => return Ok(Value::Bool(left != right)),
            _ => {}
        }

        // Null is absorbing for arithmetic and ordering, so masks built
        // over nullable columns drop the null rows instead of crashing.
        if matches!(left, Value::Null) || matches!(right, Value::Null) {
            return Ok(Value::Null);
        }

        if let (Value::Str(a), Value::Str(b)) = (&left, &right) {
            return match op {
                Add => Ok(Value::Str(format!("{a}{b}"))),
                GreaterThan => Ok(Value::Bool(a > b)),
                LessThan => Ok(Value::Bool(a < b)),
                GreaterEqual => Ok(Value::Bool(a >= b)),
                LessEqual => Ok(Value::Bool(a <= b)),
                _ => Err(EvalError::invalid("Operation not defined for strings", span)),
            };
        }

        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => {
                let (a, b) = (*a, *b);
                match op {
                    Add => Ok(Value::Int(a.saturating_add(b))),
                    Subtract => Ok(Value::Int(a.saturating_sub(b))),
                    Multiply => Ok(Value::Int(a.saturating_mul(b))),
                    Divide => {
                        if b == 0 {
                            Err(EvalError::DivisionByZero { span })
                        } else {
                            Ok(Value::Float(a as f64 / b as f64))
                        }
                    }
                    Modulo => {
                        if b == 0 {
                            Err(EvalError::DivisionByZero { span })
                        } else {
                            Ok(Value::Int(a % b))
                        }
                    }
                    GreaterThan => Ok(Value::Bool(a > b)),
                    LessThan => Ok(Value::Bool(a < b)),
                    GreaterEqual => Ok(Value::Bool(a >= b)),
                    LessEqual => Ok(Value::Bool(a <= b)),
                    And | Or | Equal | NotEqual => unreachable!(),
                }
            }
            _ => {
                let (a, b) = match (left.as_f64(), right.as_f64()) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(EvalError::TypeMismatch {
                            expected: "number".to_string(),
                            found: format!("{} and {}", left.type_name(), right.type_name()),
                            span,
                        })
                    }
                };
                match op {
                    Add => Ok(Value::Float(a + b)),
                    Subtract => Ok(Value::Float(a - b)),
                    Multiply => Ok(Value::Float(a * b)),
                    Divide => {
                        if b == 0.0 {
                            Err(EvalError::DivisionByZero { span })
                        } else {
                            Ok(Value::Float(a / b))
                        }
                    }
                    Modulo => {
                        if b == 0.0 {
                            Err(EvalError::DivisionByZero { span })
                        } else {
                            Ok(Value::Float(a % b))
                        }
                    }
                    GreaterThan => Ok(Value::Bool(a > b)),
                    LessThan => Ok(Value::Bool(a < b)),
                    GreaterEqual => Ok(Value::Bool(a >= b)),
                    LessEqual => Ok(Value::Bool(a <= b)),
                    And | Or | Equal | NotEqual => unreachable!(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;
    use crate::lang::parse_snippet;

    fn orders() -> Arc<DataFrame> {
        Arc::new(
            DataFrame::new("orders")
                .with_column("qty", Column::from_i64(vec![Some(2), Some(5), None, Some(8)]))
                .unwrap()
                .with_column(
                    "revenue",
                    Column::from_f64(vec![Some(10.0), Some(25.0), Some(3.5), Some(40.0)]),
                )
                .unwrap(),
        )
    }

    fn run(source: &str) -> EvalOutcome {
        run_with_gas(source, 100_000)
    }

    fn run_with_gas(source: &str, gas: u64) -> EvalOutcome {
        let helpers = HelperRegistry::builtin();
        let snippet = parse_snippet(source).unwrap();
        let mut bindings = HashMap::new();
        bindings.insert("orders".to_string(), orders());
        Interpreter::new(bindings, &helpers, gas).run(&snippet)
    }

    #[test]
    fn test_arithmetic_and_result_value() {
        let outcome = run("x = 2 + 3 * 4\nx - 1");
        assert_eq!(outcome.result.unwrap(), Value::Int(13));
    }

    #[test]
    fn test_column_projection_is_vector() {
        let outcome = run("orders.qty");
        assert_eq!(
            outcome.result.unwrap(),
            Value::List(vec![
                Value::Int(2),
                Value::Int(5),
                Value::Null,
                Value::Int(8)
            ])
        );
    }

    #[test]
    fn test_comparison_broadcasts_to_mask() {
        let outcome = run("orders.qty > 3");
        assert_eq!(
            outcome.result.unwrap(),
            Value::List(vec![
                Value::Bool(false),
                Value::Bool(true),
                Value::Null,
                Value::Bool(true)
            ])
        );
    }

    #[test]
    fn test_division_by_zero_raises() {
        assert_eq!(
            run("1 / 0").result.unwrap_err(),
            EvalError::DivisionByZero {
                span: Span::new(1, 1)
            }
        );
    }

    #[test]
    fn test_gas_limit_stops_evaluation() {
        let outcome = run_with_gas("orders.revenue + orders.revenue", 5);
        assert_eq!(outcome.result.unwrap_err(), EvalError::OutOfGas);
        assert_eq!(outcome.gas_used, 5);
    }

    #[test]
    fn test_failed_run_reports_gas_and_output() {
        let outcome = run("print('before')\n1 / 0");
        assert!(outcome.result.is_err());
        assert!(outcome.gas_used > 0);
        assert_eq!(outcome.output, vec!["before".to_string()]);
    }

    #[test]
    fn test_conditional_expression() {
        let outcome = run("'big' if sum(orders.revenue) > 50 else 'small'");
        assert_eq!(outcome.result.unwrap(), Value::Str("big".to_string()));
    }

    #[test]
    fn test_print_is_captured_not_printed() {
        let outcome = run("print('total:', 78.5)\n1");
        assert_eq!(outcome.output, vec!["total: 78.5".to_string()]);
        assert_eq!(outcome.result.unwrap(), Value::Int(1));
    }

    #[test]
    fn test_negative_index() {
        let outcome = run("[10, 20, 30][-1]");
        assert_eq!(outcome.result.unwrap(), Value::Int(30));
    }

    #[test]
    fn test_unknown_variable() {
        assert!(matches!(
            run("ghost + 1").result.unwrap_err(),
            EvalError::VariableNotFound { .. }
        ));
    }
}
