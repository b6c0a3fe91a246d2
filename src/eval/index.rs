/// Subscripting: `arr[i]` and the half-open range `arr[i:j]`
///
/// Subscripts work over materialized lists, id sets, heap arrays and
/// extractable collections. Negative positions count from the end; a single
/// index that still falls outside the bounds reads as null, while a range is
/// clamped and may come back shorter than asked for (or empty).
use std::rc::Rc;

use anyhow::Result;

use crate::eval::context::EvaluationContext;
use crate::eval::errors::EvalError;
use crate::query::ir::{Expr, IndexExpr};
use crate::snapshot::Snapshot;
use crate::value::{ObjectId, Value};

pub(crate) fn compute_index(ie: &IndexExpr, ctx: &EvaluationContext) -> Result<Value> {
    let subject = ie.subject.compute(ctx)?;
    if subject.is_null() {
        return Ok(Value::Null);
    }
    let from = index_operand(&ie.from, ctx)?;
    let to = match &ie.to {
        Some(to) => Some(index_operand(to, ctx)?),
        None => None,
    };
    match &subject {
        Value::List(items) => match to {
            None => Ok(position(from, items.len())
                .map(|i| items[i].clone())
                .unwrap_or(Value::Null)),
            Some(to) => {
                let (lo, hi) = range(from, to, items.len());
                Ok(Value::List(items[lo..hi].to_vec()))
            }
        },
        Value::Ids(ids) => match to {
            None => Ok(position(from, ids.len())
                .map(|i| Value::Object(ids[i]))
                .unwrap_or(Value::Null)),
            Some(to) => {
                let (lo, hi) = range(from, to, ids.len());
                Ok(Value::Ids(ids[lo..hi].to_vec()))
            }
        },
        Value::Object(id) => index_object(ie, *id, from, to, ctx),
        other => Err(anyhow::anyhow!(EvalError::NotIndexable {
            subject: other.type_name().to_string(),
        })),
    }
}

fn index_operand(e: &Expr, ctx: &EvaluationContext) -> Result<i64> {
    let v = e.compute(ctx)?;
    v.as_index().ok_or_else(|| {
        anyhow::anyhow!(EvalError::InvalidIndexType(
            e.to_string(),
            v.type_name().to_string()
        ))
    })
}

/// Resolve a single position: negative values count from the end, anything
/// still outside the bounds is `None`
fn position(i: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if i < 0 { len + i } else { i };
    if (0..len).contains(&i) {
        Some(i as usize)
    } else {
        None
    }
}

/// Normalize a half-open range: wrap negatives, clamp both ends to the
/// bounds, and collapse inverted ranges to empty
fn range(from: i64, to: i64, len: usize) -> (usize, usize) {
    let len = len as i64;
    let wrap = |i: i64| if i < 0 { len + i } else { i };
    let lo = wrap(from).clamp(0, len);
    let hi = wrap(to).clamp(0, len);
    if lo > hi {
        (lo as usize, lo as usize)
    } else {
        (lo as usize, hi as usize)
    }
}

fn index_object(
    ie: &IndexExpr,
    id: ObjectId,
    from: i64,
    to: Option<i64>,
    ctx: &EvaluationContext,
) -> Result<Value> {
    let snapshot = ctx.require_snapshot()?;
    if let Some(len) = snapshot.array_length(id)? {
        return match to {
            None => match position(from, len) {
                Some(i) => Ok(snapshot.array_element(id, i)?),
                None => Ok(Value::Null),
            },
            Some(to) => {
                let (lo, hi) = range(from, to, len);
                let mut items = Vec::with_capacity(hi - lo);
                for i in lo..hi {
                    items.push(snapshot.array_element(id, i)?);
                }
                Ok(Value::List(items))
            }
        };
    }
    if let Some(entries) = extracted_entries(ie, id, snapshot)? {
        // The declared size governs the bounds; entries the extractor did
        // not resolve read as null
        let len = snapshot.collection_size(id)?.unwrap_or(entries.len());
        let entry_at = |i: usize| {
            entries
                .get(i)
                .map(|e| Value::Object(*e))
                .unwrap_or(Value::Null)
        };
        return match to {
            None => match position(from, len) {
                Some(i) => Ok(entry_at(i)),
                None => Ok(Value::Null),
            },
            Some(to) => {
                let (lo, hi) = range(from, to, len);
                Ok(Value::List((lo..hi).map(entry_at).collect()))
            }
        };
    }
    Err(anyhow::anyhow!(EvalError::NotIndexable {
        subject: format!("object #{id}"),
    }))
}

fn extracted_entries(
    ie: &IndexExpr,
    id: ObjectId,
    snapshot: &dyn Snapshot,
) -> Result<Option<Rc<Vec<ObjectId>>>> {
    if let Some(hit) = ie.cache.lookup(id) {
        return Ok(Some(hit));
    }
    match snapshot.extract_entries(id)? {
        Some(entries) => {
            let entries = Rc::new(entries);
            ie.cache.store(id, Rc::clone(&entries));
            Ok(Some(entries))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_positions_wrap_and_fall_off_to_none() {
        assert_eq!(position(0, 3), Some(0));
        assert_eq!(position(-1, 3), Some(2));
        assert_eq!(position(3, 3), None);
        assert_eq!(position(-4, 3), None);
    }

    #[test]
    fn ranges_clamp_and_collapse() {
        assert_eq!(range(0, 2, 3), (0, 2));
        assert_eq!(range(-2, 3, 3), (1, 3));
        assert_eq!(range(0, 10, 3), (0, 3));
        assert_eq!(range(2, 1, 3), (2, 2));
        assert_eq!(range(-10, -10, 3), (0, 0));
    }
}
