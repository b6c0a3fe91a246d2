/// Dotted attribute paths
///
/// A path resolves its base, then folds one step per segment. A null value
/// anywhere along the way makes the whole path null rather than an error,
/// mirroring how fields of unreachable objects read in a heap dump.
use anyhow::Result;

use crate::eval::context::EvaluationContext;
use crate::eval::errors::EvalError;
use crate::query::ir::{PathBase, PathSegment};
use crate::snapshot::Snapshot;
use crate::value::Value;

pub(crate) fn compute_path(
    base: &PathBase,
    segments: &[PathSegment],
    ctx: &EvaluationContext,
) -> Result<Value> {
    let mut value = resolve_base(base, ctx)?;
    for seg in segments {
        if value.is_null() {
            return Ok(Value::Null);
        }
        value = step(value, seg, ctx)?;
    }
    Ok(value)
}

/// How the leading identifier binds: an alias somewhere in the chain wins;
/// otherwise it reads as the first attribute of the ambient subject
fn resolve_base(base: &PathBase, ctx: &EvaluationContext) -> Result<Value> {
    match base {
        PathBase::Implicit => match ctx.subject() {
            Some(v) => Ok(v.clone()),
            None => Err(anyhow::anyhow!(EvalError::UnknownIdentifier(
                "this".to_string()
            ))),
        },
        PathBase::Ident(name) => {
            if ctx.has_alias(name) {
                return Ok(ctx.lookup_alias(name).cloned().unwrap_or(Value::Null));
            }
            match ctx.subject() {
                Some(subject) => {
                    let subject = subject.clone();
                    step(
                        subject,
                        &PathSegment {
                            name: name.clone(),
                            native: false,
                        },
                        ctx,
                    )
                }
                None => Err(anyhow::anyhow!(EvalError::UnknownIdentifier(name.clone()))),
            }
        }
        PathBase::Expr(e) => e.compute(ctx),
    }
}

fn step(value: Value, seg: &PathSegment, ctx: &EvaluationContext) -> Result<Value> {
    match &value {
        Value::List(items) => {
            if seg.name == "length" {
                return Ok(Value::Int(items.len() as i32));
            }
            Err(unknown_attribute(seg, &value))
        }
        Value::Ids(ids) => {
            if seg.name == "length" {
                return Ok(Value::Int(ids.len() as i32));
            }
            Err(unknown_attribute(seg, &value))
        }
        Value::Row(cols) => Ok(cols
            .iter()
            .find(|(name, _)| name == &seg.name)
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Null)),
        Value::Object(id) => {
            let snapshot = ctx.require_snapshot()?;
            if seg.native {
                native_attribute(snapshot, *id, &seg.name)
            } else {
                object_field(snapshot, *id, seg)
            }
        }
        _ => Err(unknown_attribute(seg, &value)),
    }
}

/// Attributes of the heap object itself, addressed with a leading `@`
fn native_attribute(snapshot: &dyn Snapshot, id: i32, name: &str) -> Result<Value> {
    match name {
        "objectId" => Ok(Value::Int(id)),
        "objectAddress" => Ok(Value::Long(snapshot.object_address(id)? as i64)),
        "clazz" => Ok(Value::Object(snapshot.class_of(id)?)),
        "usedHeapSize" => Ok(Value::Long(snapshot.used_heap_size(id)?)),
        "retainedHeapSize" => Ok(Value::Long(snapshot.retained_heap_size(id)?)),
        "displayName" => Ok(Value::String(snapshot.display_name(id)?)),
        "length" => match snapshot.array_length(id)? {
            Some(len) => Ok(Value::Int(len as i32)),
            None => Ok(Value::Null),
        },
        "outboundReferences" => Ok(Value::Ids(snapshot.outbound_refs(id)?)),
        "inboundReferences" => Ok(Value::Ids(snapshot.inbound_refs(id)?)),
        "dominator" => match snapshot.immediate_dominator(id)? {
            Some(d) => Ok(Value::Object(d)),
            None => Ok(Value::Null),
        },
        _ => Err(anyhow::anyhow!(EvalError::UnknownAttribute {
            name: format!("@{name}"),
            on: format!("object #{id}"),
        })),
    }
}

/// An instance field, falling back to a static field when the object is a
/// class. A field missing from the class chain is an error, not null, so
/// typos in queries surface immediately.
fn object_field(snapshot: &dyn Snapshot, id: i32, seg: &PathSegment) -> Result<Value> {
    if field_declared(snapshot, id, &seg.name)? {
        if let Some(v) = snapshot.field_value(id, &seg.name)? {
            return Ok(v);
        }
        return Ok(Value::Null);
    }
    if snapshot.is_class(id) {
        if let Some(v) = snapshot.static_field_value(id, &seg.name)? {
            return Ok(v);
        }
    }
    let class_name = snapshot
        .class_info(snapshot.class_of(id)?)
        .map(|c| c.name)
        .unwrap_or_else(|_| "?".to_string());
    Err(anyhow::anyhow!(EvalError::UnknownAttribute {
        name: seg.name.clone(),
        on: class_name,
    }))
}

fn field_declared(snapshot: &dyn Snapshot, id: i32, field: &str) -> Result<bool> {
    let mut cursor = Some(snapshot.class_of(id)?);
    while let Some(cid) = cursor {
        let info = snapshot.class_info(cid)?;
        if info.field_names.iter().any(|f| f == field) {
            return Ok(true);
        }
        cursor = info.super_class;
    }
    Ok(false)
}

fn unknown_attribute(seg: &PathSegment, value: &Value) -> anyhow::Error {
    anyhow::anyhow!(EvalError::UnknownAttribute {
        name: seg.name.clone(),
        on: value.type_name().to_string(),
    })
}
