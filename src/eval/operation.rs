/// Binary operator semantics over computed values
///
/// AND/OR short-circuit and therefore live in the dispatcher; everything
/// here sees both operands already computed. Numeric operands are promoted
/// to the wider of their two kinds before comparison or arithmetic, and
/// division is always carried out in floating point.
use std::cmp::Ordering;

use anyhow::Result;

use crate::eval::context::EvaluationContext;
use crate::eval::errors::EvalError;
use crate::eval::string_form;
use crate::query::ir::BinaryOp;
use crate::value::{NumKind, Value};

pub(crate) fn apply(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    lhs_text: &str,
    rhs_text: &str,
    ctx: &EvaluationContext,
) -> Result<Value> {
    match op {
        BinaryOp::Equal => Ok(Value::Boolean(values_equal(lhs, rhs))),
        BinaryOp::NotEqual => Ok(Value::Boolean(!values_equal(lhs, rhs))),
        BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual
        | BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual => {
            let ordering = compare(op, lhs, rhs, lhs_text, rhs_text)?;
            let holds = match op {
                BinaryOp::GreaterThan => ordering == Ordering::Greater,
                BinaryOp::GreaterThanOrEqual => ordering != Ordering::Less,
                BinaryOp::LessThan => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            };
            Ok(Value::Boolean(holds))
        }
        BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide => {
            arithmetic(op, lhs, rhs, lhs_text, rhs_text, ctx)
        }
        BinaryOp::In => Ok(Value::Boolean(contains(rhs, lhs, rhs_text)?)),
        BinaryOp::NotIn => Ok(Value::Boolean(!contains(rhs, lhs, rhs_text)?)),
        // handled by the dispatcher
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators"),
    }
}

// Only called on operands already known to be numeric
fn int_value(v: &Value) -> i64 {
    v.as_i64().unwrap_or_default()
}

fn float_value(v: &Value) -> f64 {
    v.as_f64().unwrap_or_default()
}

/// Equality never errors: null equals only null, numerics compare after
/// promotion, and operands of different shapes are simply unequal
pub(crate) fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if lhs.is_null() || rhs.is_null() {
        return lhs.is_null() && rhs.is_null();
    }
    if let (Some(lk), Some(rk)) = (lhs.numeric_kind(), rhs.numeric_kind()) {
        return match lk.max(rk) {
            NumKind::Int | NumKind::Long => int_value(lhs) == int_value(rhs),
            NumKind::Float | NumKind::Double => float_value(lhs) == float_value(rhs),
        };
    }
    lhs == rhs
}

fn compare(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    lhs_text: &str,
    rhs_text: &str,
) -> Result<Ordering> {
    if lhs.is_null() {
        return Err(anyhow::anyhow!(EvalError::NullOperand {
            expr: lhs_text.to_string(),
            op: op.symbol().to_string(),
        }));
    }
    if rhs.is_null() {
        return Err(anyhow::anyhow!(EvalError::NullOperand {
            expr: rhs_text.to_string(),
            op: op.symbol().to_string(),
        }));
    }
    if let (Some(lk), Some(rk)) = (lhs.numeric_kind(), rhs.numeric_kind()) {
        let ordering = match lk.max(rk) {
            NumKind::Int | NumKind::Long => {
                let (a, b) = (int_value(lhs), int_value(rhs));
                a.cmp(&b)
            }
            NumKind::Float | NumKind::Double => {
                let (a, b) = (float_value(lhs), float_value(rhs));
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
        };
        return Ok(ordering);
    }
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return Ok(a.cmp(b));
    }
    Err(anyhow::anyhow!(EvalError::NotComparable {
        lhs: lhs.type_name().to_string(),
        rhs: rhs.type_name().to_string(),
    }))
}

fn arithmetic(
    op: BinaryOp,
    lhs: &Value,
    rhs: &Value,
    lhs_text: &str,
    rhs_text: &str,
    ctx: &EvaluationContext,
) -> Result<Value> {
    // `+` concatenates when the left operand is a string; chars stay at the
    // int rank, as in every other numeric position
    if op == BinaryOp::Plus {
        if let Value::String(s) = lhs {
            let mut out = s.clone();
            out.push_str(&string_form(rhs, ctx)?);
            return Ok(Value::String(out));
        }
    }
    if lhs.is_null() {
        return Err(anyhow::anyhow!(EvalError::NullOperand {
            expr: lhs_text.to_string(),
            op: op.symbol().to_string(),
        }));
    }
    if rhs.is_null() {
        return Err(anyhow::anyhow!(EvalError::NullOperand {
            expr: rhs_text.to_string(),
            op: op.symbol().to_string(),
        }));
    }
    let (lk, rk) = match (lhs.numeric_kind(), rhs.numeric_kind()) {
        (Some(lk), Some(rk)) => (lk, rk),
        (None, _) => {
            return Err(anyhow::anyhow!(EvalError::NotANumber(lhs_text.to_string())))
        }
        (_, None) => {
            return Err(anyhow::anyhow!(EvalError::NotANumber(rhs_text.to_string())))
        }
    };
    if op == BinaryOp::Divide {
        return Ok(Value::Double(float_value(lhs) / float_value(rhs)));
    }
    match lk.max(rk) {
        NumKind::Int => {
            let (a, b) = (int_value(lhs) as i32, int_value(rhs) as i32);
            let n = match op {
                BinaryOp::Plus => a.wrapping_add(b),
                BinaryOp::Minus => a.wrapping_sub(b),
                _ => a.wrapping_mul(b),
            };
            Ok(Value::Int(n))
        }
        NumKind::Long => {
            let (a, b) = (int_value(lhs), int_value(rhs));
            let n = match op {
                BinaryOp::Plus => a.wrapping_add(b),
                BinaryOp::Minus => a.wrapping_sub(b),
                _ => a.wrapping_mul(b),
            };
            Ok(Value::Long(n))
        }
        NumKind::Float => {
            let (a, b) = (float_value(lhs) as f32, float_value(rhs) as f32);
            let n = match op {
                BinaryOp::Plus => a + b,
                BinaryOp::Minus => a - b,
                _ => a * b,
            };
            Ok(Value::Float(n))
        }
        NumKind::Double => {
            let (a, b) = (float_value(lhs), float_value(rhs));
            let n = match op {
                BinaryOp::Plus => a + b,
                BinaryOp::Minus => a - b,
                _ => a * b,
            };
            Ok(Value::Double(n))
        }
    }
}

/// Membership for IN: lists by value equality, id sets by object identity,
/// tables by their first column
fn contains(container: &Value, needle: &Value, container_text: &str) -> Result<bool> {
    match container {
        Value::List(items) => Ok(items.iter().any(|v| values_equal(v, needle))),
        Value::Ids(ids) => match needle {
            Value::Object(id) => Ok(ids.contains(id)),
            Value::Int(id) => Ok(ids.contains(id)),
            _ => Ok(false),
        },
        Value::Table(table) => Ok(table
            .rows
            .iter()
            .filter_map(|row| row.first())
            .any(|v| values_equal(v, needle))),
        other => Err(anyhow::anyhow!(EvalError::BadInOperand(format!(
            "{} (`{}`)",
            other.type_name(),
            container_text
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::context::Session;
    use crate::snapshot::memory::SnapshotBuilder;
    use crate::snapshot::NoProgress;

    fn with_ctx<R>(f: impl FnOnce(&EvaluationContext) -> R) -> R {
        let snap = SnapshotBuilder::new().build();
        let session = Session::new();
        let progress = NoProgress;
        let ctx = EvaluationContext::root(&snap, &progress, &session);
        f(&ctx)
    }

    fn apply_simple(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
        with_ctx(|ctx| apply(op, &lhs, &rhs, "lhs", "rhs", ctx))
    }

    #[test]
    fn promotion_makes_mixed_kinds_equal() {
        assert_eq!(
            apply_simple(BinaryOp::Equal, Value::Int(5), Value::Long(5)).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            apply_simple(BinaryOp::Equal, Value::Int(5), Value::Double(5.0)).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            apply_simple(BinaryOp::Equal, Value::Byte(5), Value::Int(5)).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn null_equals_only_null() {
        assert_eq!(
            apply_simple(BinaryOp::Equal, Value::Null, Value::Null).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            apply_simple(BinaryOp::Equal, Value::Null, Value::Int(5)).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            apply_simple(BinaryOp::NotEqual, Value::Null, Value::Int(5)).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn ordering_a_null_names_the_null_side() {
        let err = apply_simple(BinaryOp::GreaterThan, Value::Null, Value::Int(5)).unwrap_err();
        assert!(err.to_string().contains("`lhs` is null"));
        let err = apply_simple(BinaryOp::LessThan, Value::Int(5), Value::Null).unwrap_err();
        assert!(err.to_string().contains("`rhs` is null"));
    }

    #[test]
    fn division_is_always_floating_point() {
        assert_eq!(
            apply_simple(BinaryOp::Divide, Value::Int(7), Value::Int(2)).unwrap(),
            Value::Double(3.5)
        );
        match apply_simple(BinaryOp::Divide, Value::Int(1), Value::Int(0)).unwrap() {
            Value::Double(d) => assert!(d.is_infinite()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn arithmetic_keeps_the_wider_kind() {
        assert_eq!(
            apply_simple(BinaryOp::Plus, Value::Int(1), Value::Long(2)).unwrap(),
            Value::Long(3)
        );
        assert_eq!(
            apply_simple(BinaryOp::Multiply, Value::Short(3), Value::Int(4)).unwrap(),
            Value::Int(12)
        );
    }

    #[test]
    fn plus_concatenates_behind_a_textual_left_operand() {
        assert_eq!(
            apply_simple(
                BinaryOp::Plus,
                Value::String("n=".to_string()),
                Value::Int(5)
            )
            .unwrap(),
            Value::String("n=5".to_string())
        );
    }

    #[test]
    fn char_operands_are_numeric_in_arithmetic() {
        assert_eq!(
            apply_simple(BinaryOp::Plus, Value::Char('a'), Value::Int(1)).unwrap(),
            Value::Int(98)
        );
        assert_eq!(
            apply_simple(BinaryOp::Minus, Value::Char('b'), Value::Char('a')).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn in_over_lists_ids_and_tables() {
        let list = Value::List(vec![Value::Int(1), Value::Long(2)]);
        assert_eq!(
            apply_simple(BinaryOp::In, Value::Int(2), list.clone()).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            apply_simple(BinaryOp::NotIn, Value::Int(3), list).unwrap(),
            Value::Boolean(true)
        );

        let ids = Value::Ids(vec![4, 5]);
        assert_eq!(
            apply_simple(BinaryOp::In, Value::Object(5), ids).unwrap(),
            Value::Boolean(true)
        );

        assert!(apply_simple(BinaryOp::In, Value::Int(1), Value::Int(2)).is_err());
    }
}
