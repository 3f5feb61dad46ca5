//! Expression evaluation against a record's already-fetched values
//!
//! Used for UPDATE SET values such as `Name = Name + '-'` and INSERT values
//! that are neither literals nor parameters.

use std::cmp::Ordering;

use chrono::{Duration, NaiveDateTime, Utc};

use crate::ast::{BinaryOp, Expression, UnaryOp};
use crate::error::{Error, Result};
use crate::value::{Record, Value};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Tree-walking interpreter over [`Expression`]
pub struct Evaluator<'a> {
    record: &'a Record,
    params: &'a [Value],
    now: NaiveDateTime,
    root: Option<&'a str>,
}

/// Drop a leading `root.` qualifier from a column path, ignoring case
pub(crate) fn unqualified<'p>(path: &'p str, root: &str) -> &'p str {
    match path.split_once('.') {
        Some((head, rest)) if head.eq_ignore_ascii_case(root) => rest,
        _ => path,
    }
}

impl<'a> Evaluator<'a> {
    pub fn new(record: &'a Record, params: &'a [Value]) -> Self {
        Self {
            record,
            params,
            now: Utc::now().naive_utc(),
            root: None,
        }
    }

    /// Treat `root.Field` column references as `Field`
    pub fn with_root(mut self, root: &'a str) -> Self {
        self.root = Some(root);
        self
    }

    /// Fix the instant `CURRENT_TIMESTAMP` and `CURRENT_DATE` report
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    pub fn evaluate(&self, expr: &Expression) -> Result<Value> {
        match expr {
            Expression::Null => Ok(Value::Null),
            Expression::Boolean(b) => Ok(Value::Boolean(*b)),
            Expression::Integer(i) => Ok(Value::Integer(*i)),
            Expression::Double(d) => Ok(Value::Double(*d)),
            Expression::String(s) => Ok(Value::String(s.clone())),
            Expression::Date(d) => Ok(Value::Date(*d)),
            Expression::Time(t) => Ok(Value::Time(*t)),
            Expression::Timestamp(ts) => Ok(Value::Timestamp(*ts)),
            Expression::Column(path) => {
                let key = match self.root {
                    Some(root) => unqualified(path, root),
                    None => path,
                };
                self.record
                    .get(key)
                    .cloned()
                    .ok_or_else(|| Error::UnknownField {
                        field: path.clone(),
                        object: "current record".to_string(),
                    })
            }
            Expression::Parameter(n) => self
                .params
                .get(n.wrapping_sub(1))
                .cloned()
                .ok_or(Error::MissingParameter(*n)),
            Expression::Nested(inner) => self.evaluate(inner),
            Expression::Unary { op, operand } => {
                let value = self.evaluate(operand)?;
                match (op, value) {
                    (UnaryOp::Minus, Value::Integer(i)) => Ok(i
                        .checked_neg()
                        .map(Value::Integer)
                        .unwrap_or(Value::Double(-(i as f64)))),
                    (UnaryOp::Minus, Value::Double(d)) => Ok(Value::Double(-d)),
                    (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
                    (_, Value::Null) => Ok(Value::Null),
                    (_, other) => Err(unsupported(&other, &other)),
                }
            }
            Expression::Binary { left, op, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                binary(*op, left, right)
            }
            Expression::IsNull { expr, negated } => {
                let is_null = self.evaluate(expr)?.is_null();
                Ok(Value::Boolean(is_null != *negated))
            }
            Expression::InList {
                expr,
                list,
                negated,
            } => {
                let needle = self.evaluate(expr)?;
                let mut found = false;
                for candidate in list {
                    if compare(&needle, &self.evaluate(candidate)?) == Some(Ordering::Equal) {
                        found = true;
                        break;
                    }
                }
                Ok(Value::Boolean(found != *negated))
            }
            Expression::Function { name, args } => self.call(name, args),
            Expression::SubQuery(_) | Expression::InSubquery { .. } => Err(
                Error::InvalidStatement(format!("sub-select cannot be evaluated here: {}", expr)),
            ),
        }
    }

    fn call(&self, name: &str, args: &[Expression]) -> Result<Value> {
        let upper = name.to_ascii_uppercase();
        match (upper.as_str(), args) {
            ("CURRENT_TIMESTAMP", []) => Ok(Value::Timestamp(self.now)),
            ("CURRENT_DATE", []) => Ok(Value::Date(self.now.date())),
            _ => Err(Error::FunctionNotImplemented(name.to_string())),
        }
    }
}

/// Evaluate with the current wall-clock time
pub fn evaluate(expr: &Expression, record: &Record, params: &[Value]) -> Result<Value> {
    Evaluator::new(record, params).evaluate(expr)
}

fn unsupported(left: &Value, right: &Value) -> Error {
    Error::UnsupportedArgumentType {
        left: left.kind_name().to_string(),
        right: right.kind_name().to_string(),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    match op {
        BinaryOp::Plus => add(left, right),
        BinaryOp::Minus => subtract(left, right),
        BinaryOp::Multiply => multiply(left, right),
        BinaryOp::Divide => divide(left, right),
        BinaryOp::Concat => Ok(concat(&left, &right)),
        BinaryOp::And | BinaryOp::Or => match (&left, &right) {
            (Value::Boolean(l), Value::Boolean(r)) => Ok(Value::Boolean(if op == BinaryOp::And {
                *l && *r
            } else {
                *l || *r
            })),
            _ => Err(unsupported(&left, &right)),
        },
        BinaryOp::Like => Err(Error::FunctionNotImplemented("LIKE".to_string())),
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            let ordering = compare(&left, &right).ok_or_else(|| unsupported(&left, &right))?;
            let result = match op {
                BinaryOp::Eq => ordering == Ordering::Equal,
                BinaryOp::NotEq => ordering != Ordering::Equal,
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::LtEq => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Boolean(result))
        }
    }
}

fn concat(left: &Value, right: &Value) -> Value {
    Value::String(format!("{}{}", left, right))
}

fn is_numeric(value: &Value) -> bool {
    matches!(value, Value::Integer(_) | Value::Double(_))
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    }
}

fn is_temporal(value: &Value) -> bool {
    matches!(value, Value::Date(_) | Value::Time(_) | Value::Timestamp(_))
}

/// Apply a numeric operation, promoting to double when either side is one
fn numeric(
    left: &Value,
    right: &Value,
    int_op: impl Fn(i64, i64) -> Result<Option<i64>>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    match (left, right) {
        (Value::Integer(l), Value::Integer(r)) => match int_op(*l, *r)? {
            Some(v) => Ok(Value::Integer(v)),
            None => Ok(Value::Double(float_op(*l as f64, *r as f64))),
        },
        _ => match (as_f64(left), as_f64(right)) {
            (Some(l), Some(r)) => Ok(Value::Double(float_op(l, r))),
            _ => Err(unsupported(left, right)),
        },
    }
}

fn add(left: Value, right: Value) -> Result<Value> {
    if is_numeric(&left) && is_numeric(&right) {
        return numeric(&left, &right, |l, r| Ok(l.checked_add(r)), |l, r| l + r);
    }
    if is_temporal(&left) && is_numeric(&right) {
        return shift(&left, &right, 1.0);
    }
    if is_numeric(&left) && is_temporal(&right) {
        return shift(&right, &left, 1.0);
    }
    Ok(concat(&left, &right))
}

fn subtract(left: Value, right: Value) -> Result<Value> {
    if is_temporal(&left) && is_numeric(&right) {
        return shift(&left, &right, -1.0);
    }
    numeric(&left, &right, |l, r| Ok(l.checked_sub(r)), |l, r| l - r)
}

fn multiply(left: Value, right: Value) -> Result<Value> {
    numeric(&left, &right, |l, r| Ok(l.checked_mul(r)), |l, r| l * r)
}

fn divide(left: Value, right: Value) -> Result<Value> {
    numeric(
        &left,
        &right,
        |l, r| {
            if r == 0 {
                Err(Error::DivisionByZero)
            } else {
                Ok(l.checked_div(r))
            }
        },
        |l, r| l / r,
    )
}

/// Shift a temporal value by `sign * amount` days. The magnitude splits into
/// `floor(|amount|)` whole days and the rounded remainder in seconds; the sign
/// applies to both parts.
fn shift(temporal: &Value, amount: &Value, sign: f64) -> Result<Value> {
    let n = as_f64(amount).ok_or_else(|| unsupported(temporal, amount))? * sign;
    let magnitude = n.abs();
    let whole_days = magnitude.floor();
    let seconds = ((magnitude - whole_days) * SECONDS_PER_DAY).round();
    let direction = n.signum();
    let overflow = || Error::InvalidStatement(format!("date arithmetic overflow: {} + {}", temporal, n));

    let days = Duration::try_days((direction * whole_days) as i64).ok_or_else(overflow)?;
    let secs = Duration::try_seconds((direction * seconds) as i64).ok_or_else(overflow)?;
    match temporal {
        Value::Date(d) => d
            .checked_add_signed(days)
            .map(Value::Date)
            .ok_or_else(overflow),
        Value::Time(t) => Ok(Value::Time(t.overflowing_add_signed(secs).0)),
        Value::Timestamp(ts) => ts
            .checked_add_signed(days)
            .and_then(|ts| ts.checked_add_signed(secs))
            .map(Value::Timestamp)
            .ok_or_else(overflow),
        other => Err(unsupported(other, amount)),
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Boolean(l), Value::Boolean(r)) => Some(l.cmp(r)),
        (Value::Date(l), Value::Date(r)) => Some(l.cmp(r)),
        (Value::Time(l), Value::Time(r)) => Some(l.cmp(r)),
        (Value::Timestamp(l), Value::Timestamp(r)) => Some(l.cmp(r)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => as_f64(left)?.partial_cmp(&as_f64(right)?),
    }
}
