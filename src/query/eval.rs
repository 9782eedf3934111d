//! Expression evaluation with SQL three-valued logic
//!
//! NULL compares as unknown and propagates through arithmetic; rows whose
//! predicate is Unknown are excluded by the executor. Integer arithmetic
//! overflow promotes to float and any division by zero yields NULL, matching
//! analytical-query conventions.

use super::ast::{AggFunc, BinaryOp, Expr, UnaryOp};
use crate::dataset::{Dataset, Value};
use crate::sketch::value_hash64;
use crate::{Result, TabLensError};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Kleene truth value for predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }
}

fn truth_of(value: &Value) -> Result<Truth> {
    match value {
        Value::Null => Ok(Truth::Unknown),
        Value::Boolean(true) => Ok(Truth::True),
        Value::Boolean(false) => Ok(Truth::False),
        other => Err(TabLensError::Computation(format!(
            "predicate evaluated to non-boolean value '{other}'"
        ))),
    }
}

fn truth_to_value(truth: Truth) -> Value {
    match truth {
        Truth::True => Value::Boolean(true),
        Truth::False => Value::Boolean(false),
        Truth::Unknown => Value::Null,
    }
}

/// Evaluate a scalar expression for one row. Aggregates are rejected at
/// bind time and never reach this path.
pub fn eval_scalar(expr: &Expr, dataset: &Dataset, row: usize) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Column(name) => {
            let idx = dataset
                .column_index(name)
                .ok_or_else(|| TabLensError::QueryBinding {
                    column: name.clone(),
                })?;
            Ok(dataset.columns()[idx].values[row].clone())
        }
        Expr::Unary { op, expr } => {
            let v = eval_scalar(expr, dataset, row)?;
            eval_unary(*op, v)
        }
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let l = truth_of(&eval_scalar(left, dataset, row)?)?;
                // Short-circuit on definite False.
                if l == Truth::False {
                    return Ok(Value::Boolean(false));
                }
                let r = truth_of(&eval_scalar(right, dataset, row)?)?;
                Ok(truth_to_value(l.and(r)))
            }
            BinaryOp::Or => {
                let l = truth_of(&eval_scalar(left, dataset, row)?)?;
                if l == Truth::True {
                    return Ok(Value::Boolean(true));
                }
                let r = truth_of(&eval_scalar(right, dataset, row)?)?;
                Ok(truth_to_value(l.or(r)))
            }
            _ => {
                let l = eval_scalar(left, dataset, row)?;
                let r = eval_scalar(right, dataset, row)?;
                eval_binary(*op, l, r)
            }
        },
        Expr::IsNull { expr, negated } => {
            let v = eval_scalar(expr, dataset, row)?;
            let is_null = v.is_null();
            Ok(Value::Boolean(is_null != *negated))
        }
        Expr::Aggregate { .. } => Err(TabLensError::Computation(
            "aggregate in scalar context".to_string(),
        )),
    }
}

/// Evaluate a WHERE predicate for one row.
pub fn eval_predicate(expr: &Expr, dataset: &Dataset, row: usize) -> Result<Truth> {
    truth_of(&eval_scalar(expr, dataset, row)?)
}

fn eval_unary(op: UnaryOp, v: Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(truth_to_value(truth_of(&v)?.not())),
        UnaryOp::Neg => match v {
            Value::Null => Ok(Value::Null),
            Value::Integer(i) => Ok(i
                .checked_neg()
                .map(Value::Integer)
                .unwrap_or(Value::Float(-(i as f64)))),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(TabLensError::Computation(format!(
                "cannot negate non-numeric value '{other}'"
            ))),
        },
    }
}

fn eval_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            eval_arithmetic(op, l, r)
        }
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => Ok(truth_to_value(compare_truth(op, &l, &r))),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled with short-circuit"),
    }
}

fn eval_arithmetic(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    match (&l, &r) {
        (Value::Integer(a), Value::Integer(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                // Division is float division; zero divisor yields NULL.
                BinaryOp::Div => {
                    return Ok(if b == 0 {
                        Value::Null
                    } else {
                        Value::Float(a as f64 / b as f64)
                    })
                }
                BinaryOp::Mod => {
                    return Ok(if b == 0 {
                        Value::Null
                    } else {
                        Value::Integer(a.wrapping_rem(b))
                    })
                }
                _ => unreachable!(),
            };
            // Overflow promotes to floating point.
            Ok(result.map(Value::Integer).unwrap_or_else(|| {
                Value::Float(match op {
                    BinaryOp::Add => a as f64 + b as f64,
                    BinaryOp::Sub => a as f64 - b as f64,
                    BinaryOp::Mul => a as f64 * b as f64,
                    _ => unreachable!(),
                })
            }))
        }
        _ => {
            let a = l.as_f64().ok_or_else(|| non_numeric(&l))?;
            let b = r.as_f64().ok_or_else(|| non_numeric(&r))?;
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b == 0.0 {
                        return Ok(Value::Null);
                    }
                    a / b
                }
                BinaryOp::Mod => {
                    if b == 0.0 {
                        return Ok(Value::Null);
                    }
                    a % b
                }
                _ => unreachable!(),
            };
            Ok(Value::Float(result))
        }
    }
}

fn non_numeric(v: &Value) -> TabLensError {
    TabLensError::Computation(format!("arithmetic on non-numeric value '{v}'"))
}

fn compare_truth(op: BinaryOp, l: &Value, r: &Value) -> Truth {
    if l.is_null() || r.is_null() {
        return Truth::Unknown;
    }
    let ordering = match compare_values(l, r) {
        Some(o) => o,
        None => return Truth::Unknown, // incomparable types
    };
    let holds = match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::NotEq => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::LtEq => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::GtEq => ordering != Ordering::Less,
        _ => unreachable!(),
    };
    if holds {
        Truth::True
    } else {
        Truth::False
    }
}

/// Comparison between non-null values of compatible types. Numeric types
/// compare cross-width; mismatched families are incomparable.
pub fn compare_values(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        _ => {
            let a = l.as_f64()?;
            let b = r.as_f64()?;
            Some(a.total_cmp(&b))
        }
    }
}

/// Total order for ORDER BY: NULLs sort after every value ascending (and
/// thus first when the sort is reversed for DESC); incomparable families
/// order by a fixed type rank for stability.
pub fn order_values(l: &Value, r: &Value) -> Ordering {
    match (l.is_null(), r.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_values(l, r)
            .unwrap_or_else(|| type_rank(l).cmp(&type_rank(r))),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Boolean(_) => 1,
        Value::Integer(_) | Value::Float(_) => 2,
        Value::Timestamp(_) => 3,
        Value::Text(_) => 4,
    }
}

/// Streaming aggregate accumulator. NULL inputs are excluded, per SQL.
pub enum Accumulator {
    Count { distinct: bool, seen: HashSet<u64>, n: u64 },
    Sum(NumericSum),
    Avg { sum: f64, n: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
}

/// Integer sum that promotes to float on overflow.
pub enum NumericSum {
    Empty,
    Int(i64),
    Float(f64),
}

impl Accumulator {
    pub fn new(func: AggFunc, distinct: bool) -> Self {
        match func {
            AggFunc::Count => Accumulator::Count {
                distinct,
                seen: HashSet::new(),
                n: 0,
            },
            AggFunc::Sum => Accumulator::Sum(NumericSum::Empty),
            AggFunc::Avg => Accumulator::Avg { sum: 0.0, n: 0 },
            AggFunc::Min => Accumulator::Min(None),
            AggFunc::Max => Accumulator::Max(None),
        }
    }

    /// Feed one input value. `COUNT(*)` feeds a non-null marker per row.
    pub fn push(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            Accumulator::Count { distinct, seen, n } => {
                if *distinct {
                    if seen.insert(value_hash64(value)) {
                        *n += 1;
                    }
                } else {
                    *n += 1;
                }
            }
            Accumulator::Sum(sum) => {
                let x = value.as_f64().ok_or_else(|| non_numeric(value))?;
                let next = match (&*sum, value) {
                    (NumericSum::Empty, Value::Integer(i)) => NumericSum::Int(*i),
                    (NumericSum::Empty, _) => NumericSum::Float(x),
                    (NumericSum::Int(acc), Value::Integer(i)) => match acc.checked_add(*i) {
                        Some(total) => NumericSum::Int(total),
                        None => NumericSum::Float(*acc as f64 + *i as f64),
                    },
                    (NumericSum::Int(acc), _) => NumericSum::Float(*acc as f64 + x),
                    (NumericSum::Float(acc), _) => NumericSum::Float(acc + x),
                };
                *sum = next;
            }
            Accumulator::Avg { sum, n } => {
                *sum += value.as_f64().ok_or_else(|| non_numeric(value))?;
                *n += 1;
            }
            Accumulator::Min(best) => {
                let better = match best {
                    None => true,
                    Some(b) => order_values(value, b) == Ordering::Less,
                };
                if better {
                    *best = Some(value.clone());
                }
            }
            Accumulator::Max(best) => {
                let better = match best {
                    None => true,
                    Some(b) => order_values(value, b) == Ordering::Greater,
                };
                if better {
                    *best = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    /// Final value. COUNT of an empty set is 0; the rest are NULL.
    pub fn finish(self) -> Value {
        match self {
            Accumulator::Count { n, .. } => Value::Integer(n as i64),
            Accumulator::Sum(NumericSum::Empty) => Value::Null,
            Accumulator::Sum(NumericSum::Int(total)) => Value::Integer(total),
            Accumulator::Sum(NumericSum::Float(total)) => Value::Float(total),
            Accumulator::Avg { n: 0, .. } => Value::Null,
            Accumulator::Avg { sum, n } => Value::Float(sum / n as f64),
            Accumulator::Min(best) | Accumulator::Max(best) => best.unwrap_or(Value::Null),
        }
    }
}
