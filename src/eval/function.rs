/// Built-in single-argument functions
use anyhow::Result;

use crate::eval::context::EvaluationContext;
use crate::eval::errors::EvalError;
use crate::eval::string_form;
use crate::query::ir::{Expr, FunctionKind};
use crate::value::Value;

pub(crate) fn compute_function(
    kind: FunctionKind,
    arg: &Expr,
    ctx: &EvaluationContext,
) -> Result<Value> {
    let value = arg.compute(ctx)?;
    if value.is_null() && kind != FunctionKind::ToString {
        return Ok(Value::Null);
    }
    match kind {
        FunctionKind::ToHex => match value.as_i64() {
            Some(n) => Ok(Value::String(format!("0x{n:x}"))),
            None => Err(not_applicable(kind, &value)),
        },
        FunctionKind::ToString => Ok(Value::String(string_form(&value, ctx)?)),
        FunctionKind::Inbounds => {
            let snapshot = ctx.require_snapshot()?;
            Ok(Value::Ids(snapshot.inbound_refs(object_arg(kind, &value)?)?))
        }
        FunctionKind::Outbounds => {
            let snapshot = ctx.require_snapshot()?;
            Ok(Value::Ids(
                snapshot.outbound_refs(object_arg(kind, &value)?)?,
            ))
        }
        FunctionKind::Dominators => {
            let snapshot = ctx.require_snapshot()?;
            Ok(Value::Ids(
                snapshot.immediate_dominated(object_arg(kind, &value)?)?,
            ))
        }
        FunctionKind::DominatorOf => {
            let snapshot = ctx.require_snapshot()?;
            match snapshot.immediate_dominator(object_arg(kind, &value)?)? {
                Some(d) => Ok(Value::Object(d)),
                None => Ok(Value::Null),
            }
        }
        FunctionKind::ClassOf => {
            let snapshot = ctx.require_snapshot()?;
            Ok(Value::Object(
                snapshot.class_of(object_arg(kind, &value)?)?,
            ))
        }
    }
}

fn object_arg(kind: FunctionKind, value: &Value) -> Result<i32> {
    match value {
        Value::Object(id) => Ok(*id),
        other => Err(not_applicable(kind, other)),
    }
}

fn not_applicable(kind: FunctionKind, value: &Value) -> anyhow::Error {
    anyhow::anyhow!(EvalError::UnsupportedOperand {
        op: kind.name().to_string(),
        value: value.type_name().to_string(),
    })
}
