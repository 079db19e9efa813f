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

//! The curated helper registry. These functions are the ONLY callables a
//! snippet can reach; anything transforming a frame returns a fresh one
//! over shared column storage. Callers may register extension helpers,
//! which also widens the validator's allow-list.

use crate::exec::interpreter::{EvalError, GasMeter, Value};
use crate::lang::ast::Span;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared state a helper may touch: the gas meter (vector helpers charge
/// per element) and the captured output buffer.
pub struct HelperCtx<'a> {
    pub gas: &'a mut GasMeter,
    pub output: &'a mut Vec<String>,
    pub span: Span,
}

pub type HelperFn = Arc<dyn Fn(&[Value], &mut HelperCtx<'_>) -> Result<Value, EvalError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct HelperRegistry {
    helpers: HashMap<String, HelperFn>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in analytical helpers.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("sum", Arc::new(helper_sum));
        registry.register("mean", Arc::new(helper_mean));
        registry.register("min", Arc::new(helper_min));
        registry.register("max", Arc::new(helper_max));
        registry.register("count", Arc::new(helper_count));
        registry.register("distinct", Arc::new(helper_distinct));
        registry.register("abs", Arc::new(helper_abs));
        registry.register("round", Arc::new(helper_round));
        registry.register("len", Arc::new(helper_len));
        registry.register("head", Arc::new(helper_head));
        registry.register("filter", Arc::new(helper_filter));
        registry.register("print", Arc::new(helper_print));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, helper: HelperFn) {
        self.helpers.insert(name.into(), helper);
    }

    pub fn get(&self, name: &str) -> Option<HelperFn> {
        self.helpers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.helpers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperRegistry")
            .field("helpers", &self.names())
            .finish()
    }
}

fn arity(helper: &str, expected: &str, args: &[Value], ok: bool) -> Result<(), EvalError> {
    if ok {
        Ok(())
    } else {
        Err(EvalError::BadArity {
            helper: helper.to_string(),
            expected: expected.to_string(),
            found: args.len(),
        })
    }
}

fn numeric_items<'v>(
    helper: &str,
    args: &'v [Value],
    ctx: &mut HelperCtx<'_>,
) -> Result<Vec<&'v Value>, EvalError> {
    let items = match &args[0] {
        Value::List(items) => items,
        other => {
            return Err(EvalError::TypeMismatch {
                expected: format!("list argument for '{helper}'"),
                found: other.type_name().to_string(),
                span: ctx.span,
            })
        }
    };
    ctx.gas.charge(items.len() as u64)?;
    Ok(items.iter().filter(|v| !matches!(v, Value::Null)).collect())
}

fn helper_sum(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    arity("sum", "1", args, args.len() == 1)?;
    let items = numeric_items("sum", args, ctx)?;
    let mut int_total: i64 = 0;
    let mut float_total = 0.0;
    let mut saw_float = false;
    for item in items {
        match item {
            Value::Int(i) => int_total = int_total.saturating_add(*i),
            Value::Float(f) => {
                saw_float = true;
                float_total += f;
            }
            other => {
                return Err(EvalError::TypeMismatch {
                    expected: "numeric list".to_string(),
                    found: other.type_name().to_string(),
                    span: ctx.span,
                })
            }
        }
    }
    if saw_float {
        Ok(Value::Float(float_total + int_total as f64))
    } else {
        Ok(Value::Int(int_total))
    }
}

fn helper_mean(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    arity("mean", "1", args, args.len() == 1)?;
    let items = numeric_items("mean", args, ctx)?;
    if items.is_empty() {
        return Ok(Value::Null);
    }
    let mut total = 0.0;
    for item in &items {
        total += item.as_f64().ok_or_else(|| EvalError::TypeMismatch {
            expected: "numeric list".to_string(),
            found: item.type_name().to_string(),
            span: ctx.span,
        })?;
    }
    Ok(Value::Float(total / items.len() as f64))
}

fn helper_min(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    extremum("min", args, ctx, false)
}

fn helper_max(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    extremum("max", args, ctx, true)
}

fn extremum(
    helper: &str,
    args: &[Value],
    ctx: &mut HelperCtx<'_>,
    want_max: bool,
) -> Result<Value, EvalError> {
    arity(helper, "1", args, args.len() == 1)?;
    let items = numeric_items(helper, args, ctx)?;
    let mut best: Option<&Value> = None;
    for item in items {
        let better = match (best, item) {
            (None, _) => true,
            (Some(current), candidate) => {
                let ordering = compare(current, candidate, ctx.span)?;
                if want_max {
                    ordering == std::cmp::Ordering::Less
                } else {
                    ordering == std::cmp::Ordering::Greater
                }
            }
        };
        if better {
            best = Some(item);
        }
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

fn compare(a: &Value, b: &Value, span: Span) -> Result<std::cmp::Ordering, EvalError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)),
            _ => Err(EvalError::TypeMismatch {
                expected: "comparable values".to_string(),
                found: format!("{} and {}", a.type_name(), b.type_name()),
                span,
            }),
        },
    }
}

fn helper_count(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    arity("count", "1", args, args.len() == 1)?;
    match &args[0] {
        Value::Frame(frame) => Ok(Value::Int(frame.row_count() as i64)),
        Value::List(items) => {
            ctx.gas.charge(items.len() as u64)?;
            let non_null = items.iter().filter(|v| !matches!(v, Value::Null)).count();
            Ok(Value::Int(non_null as i64))
        }
        other => Err(EvalError::TypeMismatch {
            expected: "frame or list".to_string(),
            found: other.type_name().to_string(),
            span: ctx.span,
        }),
    }
}

fn helper_distinct(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    arity("distinct", "1", args, args.len() == 1)?;
    let items = match &args[0] {
        Value::List(items) => items,
        other => {
            return Err(EvalError::TypeMismatch {
                expected: "list".to_string(),
                found: other.type_name().to_string(),
                span: ctx.span,
            })
        }
    };
    let mut unique: Vec<Value> = Vec::new();
    for item in items {
        ctx.gas.charge(1 + unique.len() as u64)?;
        if matches!(item, Value::Null) {
            continue;
        }
        if !unique.contains(item) {
            unique.push(item.clone());
        }
    }
    Ok(Value::List(unique))
}

fn helper_abs(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    arity("abs", "1", args, args.len() == 1)?;
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(i.saturating_abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Null => Ok(Value::Null),
        other => Err(EvalError::TypeMismatch {
            expected: "number".to_string(),
            found: other.type_name().to_string(),
            span: ctx.span,
        }),
    }
}

fn helper_round(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    arity("round", "1 or 2", args, args.len() == 1 || args.len() == 2)?;
    let digits = match args.get(1) {
        None => 0,
        Some(Value::Int(d)) => *d,
        Some(other) => {
            return Err(EvalError::TypeMismatch {
                expected: "integer digit count".to_string(),
                found: other.type_name().to_string(),
                span: ctx.span,
            })
        }
    };
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) => {
            let factor = 10f64.powi(digits.clamp(-12, 12) as i32);
            Ok(Value::Float((f * factor).round() / factor))
        }
        Value::Null => Ok(Value::Null),
        other => Err(EvalError::TypeMismatch {
            expected: "number".to_string(),
            found: other.type_name().to_string(),
            span: ctx.span,
        }),
    }
}

fn helper_len(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    arity("len", "1", args, args.len() == 1)?;
    match &args[0] {
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::Frame(frame) => Ok(Value::Int(frame.row_count() as i64)),
        other => Err(EvalError::TypeMismatch {
            expected: "list, string, or frame".to_string(),
            found: other.type_name().to_string(),
            span: ctx.span,
        }),
    }
}

fn helper_head(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    arity("head", "1 or 2", args, args.len() == 1 || args.len() == 2)?;
    let limit = match args.get(1) {
        None => 5usize,
        Some(Value::Int(n)) if *n >= 0 => *n as usize,
        Some(other) => {
            return Err(EvalError::TypeMismatch {
                expected: "non-negative row count".to_string(),
                found: other.type_name().to_string(),
                span: ctx.span,
            })
        }
    };
    match &args[0] {
        Value::Frame(frame) => {
            let take = frame.row_count().min(limit);
            ctx.gas.charge(take as u64)?;
            let indices: Vec<usize> = (0..take).collect();
            Ok(Value::Frame(Arc::new(frame.select_rows(&indices))))
        }
        Value::List(items) => {
            ctx.gas.charge(limit.min(items.len()) as u64)?;
            Ok(Value::List(items.iter().take(limit).cloned().collect()))
        }
        other => Err(EvalError::TypeMismatch {
            expected: "frame or list".to_string(),
            found: other.type_name().to_string(),
            span: ctx.span,
        }),
    }
}

/// `filter(frame, mask)` keeps the rows whose mask entry is truthy; null
/// mask entries drop the row. The source frame is never touched.
fn helper_filter(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    arity("filter", "2", args, args.len() == 2)?;
    let mask = match &args[1] {
        Value::List(items) => items,
        other => {
            return Err(EvalError::TypeMismatch {
                expected: "mask list".to_string(),
                found: other.type_name().to_string(),
                span: ctx.span,
            })
        }
    };
    ctx.gas.charge(mask.len() as u64)?;
    match &args[0] {
        Value::Frame(frame) => {
            if mask.len() != frame.row_count() {
                return Err(EvalError::invalid(
                    format!(
                        "Mask has {} entries, frame '{}' has {} rows",
                        mask.len(),
                        frame.name(),
                        frame.row_count()
                    ),
                    ctx.span,
                ));
            }
            let indices: Vec<usize> = mask
                .iter()
                .enumerate()
                .filter(|(_, keep)| !matches!(keep, Value::Null) && keep.is_truthy())
                .map(|(i, _)| i)
                .collect();
            Ok(Value::Frame(Arc::new(frame.select_rows(&indices))))
        }
        Value::List(items) => {
            if mask.len() != items.len() {
                return Err(EvalError::invalid(
                    format!(
                        "Mask has {} entries, list has {}",
                        mask.len(),
                        items.len()
                    ),
                    ctx.span,
                ));
            }
            Ok(Value::List(
                items
                    .iter()
                    .zip(mask)
                    .filter(|(_, keep)| !matches!(keep, Value::Null) && keep.is_truthy())
                    .map(|(item, _)| item.clone())
                    .collect(),
            ))
        }
        other => Err(EvalError::TypeMismatch {
            expected: "frame or list".to_string(),
            found: other.type_name().to_string(),
            span: ctx.span,
        }),
    }
}

fn helper_print(args: &[Value], ctx: &mut HelperCtx<'_>) -> Result<Value, EvalError> {
    let line: Vec<String> = args.iter().map(|v| v.render()).collect();
    ctx.output.push(line.join(" "));
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, DataFrame};

    fn ctx_parts() -> (GasMeter, Vec<String>) {
        (GasMeter::new(10_000), Vec::new())
    }

    fn call(
        helper: fn(&[Value], &mut HelperCtx<'_>) -> Result<Value, EvalError>,
        args: &[Value],
    ) -> Result<Value, EvalError> {
        let (mut gas, mut output) = ctx_parts();
        let mut ctx = HelperCtx {
            gas: &mut gas,
            output: &mut output,
            span: Span::new(1, 1),
        };
        helper(args, &mut ctx)
    }

    fn ints(values: &[Option<i64>]) -> Value {
        Value::List(
            values
                .iter()
                .map(|v| v.map_or(Value::Null, Value::Int))
                .collect(),
        )
    }

    #[test]
    fn test_sum_skips_nulls_and_keeps_int() {
        let result = call(helper_sum, &[ints(&[Some(1), None, Some(4)])]).unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn test_sum_promotes_to_float() {
        let list = Value::List(vec![Value::Int(1), Value::Float(0.5)]);
        assert_eq!(call(helper_sum, &[list]).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_mean_of_empty_is_null() {
        assert_eq!(
            call(helper_mean, &[ints(&[None, None])]).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_min_max() {
        let list = ints(&[Some(4), Some(1), None, Some(9)]);
        assert_eq!(call(helper_min, &[list.clone()]).unwrap(), Value::Int(1));
        assert_eq!(call(helper_max, &[list]).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_count_ignores_nulls() {
        assert_eq!(
            call(helper_count, &[ints(&[Some(1), None, Some(3)])]).unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn test_distinct_preserves_first_appearance() {
        let list = Value::List(vec![
            Value::Str("b".to_string()),
            Value::Str("a".to_string()),
            Value::Null,
            Value::Str("b".to_string()),
        ]);
        assert_eq!(
            call(helper_distinct, &[list]).unwrap(),
            Value::List(vec![
                Value::Str("b".to_string()),
                Value::Str("a".to_string())
            ])
        );
    }

    #[test]
    fn test_round_digits() {
        assert_eq!(
            call(helper_round, &[Value::Float(3.14159), Value::Int(2)]).unwrap(),
            Value::Float(3.14)
        );
    }

    #[test]
    fn test_filter_frame_leaves_source_untouched() {
        let frame = Arc::new(
            DataFrame::new("t")
                .with_column("v", Column::from_i64(vec![Some(1), Some(2), Some(3)]))
                .unwrap(),
        );
        let mask = Value::List(vec![Value::Bool(true), Value::Null, Value::Bool(true)]);
        let filtered = call(helper_filter, &[Value::Frame(frame.clone()), mask]).unwrap();
        match filtered {
            Value::Frame(view) => assert_eq!(view.row_count(), 2),
            other => panic!("expected frame, got {other:?}"),
        }
        assert_eq!(frame.row_count(), 3);
    }

    #[test]
    fn test_mask_length_mismatch_is_error() {
        let frame = Arc::new(
            DataFrame::new("t")
                .with_column("v", Column::from_i64(vec![Some(1)]))
                .unwrap(),
        );
        let mask = Value::List(vec![Value::Bool(true), Value::Bool(false)]);
        assert!(call(helper_filter, &[Value::Frame(frame), mask]).is_err());
    }

    #[test]
    fn test_bad_arity_reported() {
        assert!(matches!(
            call(helper_sum, &[]).unwrap_err(),
            EvalError::BadArity { .. }
        ));
    }
}
