/// Query execution
///
/// A query runs in three stages: the FROM clause is resolved to row
/// candidates, the WHERE clause filters them one at a time (polling for
/// cancellation as it goes), and the select clause shapes the survivors into
/// the outcome. UNION branches run against the same enclosing context and
/// append to the first branch's outcome.
use std::collections::HashSet;

use anyhow::Result;
use tracing::debug;

use crate::eval::context::{EvaluationContext, Session};
use crate::eval::errors::EvalError;
use crate::eval::{check_canceled, values_equal};
use crate::query::ir::{FromClause, FromSource, Query, SelectClause};
use crate::snapshot::{ProgressListener, Snapshot};
use crate::value::{ObjectId, ResultTable, Value};

/// What a query evaluates to, by select shape
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// `SELECT *` (and `SELECT OBJECTS ...`) over heap rows
    Objects(Vec<ObjectId>),
    /// An explicit select list
    Table(ResultTable),
    /// `SELECT *` over non-object rows, e.g. a FROM expression yielding
    /// primitive values
    Values(Vec<Value>),
}

impl QueryOutcome {
    pub fn row_count(&self) -> usize {
        match self {
            QueryOutcome::Objects(ids) => ids.len(),
            QueryOutcome::Table(t) => t.rows.len(),
            QueryOutcome::Values(vs) => vs.len(),
        }
    }
}

pub fn execute_query(
    query: &Query,
    snapshot: &dyn Snapshot,
    progress: &dyn ProgressListener,
    session: &Session,
) -> Result<QueryOutcome> {
    let ctx = EvaluationContext::root(snapshot, progress, session);
    execute_in(query, &ctx)
}

/// Run a query below an existing context, as sub-query expressions do
pub(crate) fn execute_as_value(query: &Query, parent: &EvaluationContext) -> Result<Value> {
    Ok(match execute_in(query, parent)? {
        QueryOutcome::Objects(ids) => Value::Ids(ids),
        QueryOutcome::Table(t) => Value::Table(t),
        QueryOutcome::Values(vs) => Value::List(vs),
    })
}

pub(crate) fn execute_in(query: &Query, parent: &EvaluationContext) -> Result<QueryOutcome> {
    let mut outcome = execute_single(query, parent)?;
    for branch in &query.unions {
        let addition = execute_in(branch, parent)?;
        merge(&mut outcome, addition)?;
    }
    Ok(outcome)
}

fn execute_single(query: &Query, parent: &EvaluationContext) -> Result<QueryOutcome> {
    let rows = resolve_from(&query.from, parent)?;
    debug!(candidates = rows.len(), query = %query, "resolved FROM clause");

    let mut row_ctx = parent.nested();
    row_ctx.set_alias(query.from.alias.as_deref());

    let mut kept = Vec::new();
    for row in rows {
        check_canceled(&row_ctx)?;
        row_ctx.set_subject(row.clone());
        if let Some(cond) = &query.where_clause {
            match cond.compute(&row_ctx)? {
                // an unanswerable condition drops the row
                Value::Null => continue,
                Value::Boolean(false) => continue,
                Value::Boolean(true) => {}
                other => {
                    return Err(anyhow::anyhow!(EvalError::NotABoolean(other.to_string())))
                }
            }
        }
        kept.push(row);
    }
    debug!(rows = kept.len(), "WHERE clause kept");

    shape_result(&query.select, kept, &mut row_ctx)
}

/// The values each row candidate binds to the alias
fn resolve_from(from: &FromClause, parent: &EvaluationContext) -> Result<Vec<Value>> {
    let snapshot = parent.require_snapshot()?;
    let ids = match &from.source {
        FromSource::ClassName(name) => {
            snapshot.classes_by_name(name, from.include_subclasses)?
        }
        FromSource::Pattern(p) => {
            snapshot.classes_by_pattern(&p.regex, from.include_subclasses)?
        }
        FromSource::ObjectIds(ids) => ids.clone(),
        FromSource::ObjectAddresses(addrs) => {
            let mut ids = Vec::with_capacity(addrs.len());
            for a in addrs {
                ids.push(snapshot.map_address_to_id(*a)?);
            }
            ids
        }
        FromSource::SubQuery(sub) => match execute_in(sub, parent)? {
            QueryOutcome::Objects(ids) => ids,
            QueryOutcome::Values(vs) => return Ok(vs),
            QueryOutcome::Table(t) => return Ok(table_rows(t)),
        },
        FromSource::Expression(e) => {
            let v = e.compute(parent)?;
            match v {
                Value::Object(id) => vec![id],
                Value::Ids(ids) => ids,
                Value::List(items) => {
                    let all_objects = items.iter().all(|i| matches!(i, Value::Object(_)));
                    if all_objects {
                        items
                            .iter()
                            .map(|i| match i {
                                Value::Object(id) => *id,
                                _ => unreachable!(),
                            })
                            .collect()
                    } else {
                        return Ok(items);
                    }
                }
                Value::Null => Vec::new(),
                Value::Table(t) => return Ok(table_rows(t)),
                other => return Ok(vec![other]),
            }
        }
    };
    // Without the OBJECTS keyword, class objects among the candidates stand
    // for their instances
    if from.include_objects {
        return Ok(ids.into_iter().map(Value::Object).collect());
    }
    let mut rows = Vec::new();
    for id in ids {
        if snapshot.is_class(id) {
            for inst in snapshot.objects_of_class(id)? {
                rows.push(Value::Object(inst));
            }
        } else {
            rows.push(Value::Object(id));
        }
    }
    Ok(rows)
}

/// Bind each row of a tabular result to its column names, so the attributes
/// of a sub-select row stay addressable from the enclosing query
fn table_rows(t: ResultTable) -> Vec<Value> {
    let ResultTable { columns, rows } = t;
    rows.into_iter()
        .map(|cells| Value::Row(columns.iter().cloned().zip(cells).collect()))
        .collect()
}

fn shape_result(
    select: &SelectClause,
    rows: Vec<Value>,
    row_ctx: &mut EvaluationContext,
) -> Result<QueryOutcome> {
    if select.items.is_empty() {
        let all_objects = rows.iter().all(|r| matches!(r, Value::Object(_)));
        let mut outcome = if all_objects {
            let ids = rows
                .iter()
                .map(|r| match r {
                    Value::Object(id) => *id,
                    _ => unreachable!(),
                })
                .collect();
            QueryOutcome::Objects(ids)
        } else {
            QueryOutcome::Values(rows)
        };
        if select.retained_set {
            outcome = expand_retained(outcome, row_ctx)?;
        }
        if select.distinct {
            outcome = dedup(outcome);
        }
        return Ok(outcome);
    }

    if select.as_objects || select.retained_set {
        let mut ids = Vec::new();
        for row in rows {
            check_canceled(row_ctx)?;
            row_ctx.set_subject(row);
            for item in &select.items {
                flatten_objects(&item.expr.compute(row_ctx)?, &mut ids)?;
            }
        }
        let mut outcome = QueryOutcome::Objects(ids);
        if select.retained_set {
            outcome = expand_retained(outcome, row_ctx)?;
        }
        if select.distinct {
            outcome = dedup(outcome);
        }
        return Ok(outcome);
    }

    let columns: Vec<String> = select.items.iter().map(|i| i.column_name()).collect();
    let mut table = ResultTable {
        columns,
        rows: Vec::with_capacity(rows.len()),
    };
    for row in rows {
        check_canceled(row_ctx)?;
        row_ctx.set_subject(row);
        let mut out_row = Vec::with_capacity(select.items.len());
        for item in &select.items {
            out_row.push(item.expr.compute(row_ctx)?);
        }
        table.rows.push(out_row);
    }
    let mut outcome = QueryOutcome::Table(table);
    if select.distinct {
        outcome = dedup(outcome);
    }
    Ok(outcome)
}

/// Read a selected value as heap objects for `SELECT OBJECTS`
fn flatten_objects(value: &Value, into: &mut Vec<ObjectId>) -> Result<()> {
    match value {
        Value::Null => Ok(()),
        Value::Object(id) => {
            into.push(*id);
            Ok(())
        }
        Value::Ids(ids) => {
            into.extend_from_slice(ids);
            Ok(())
        }
        Value::List(items) => {
            for item in items {
                flatten_objects(item, into)?;
            }
            Ok(())
        }
        other => Err(anyhow::anyhow!(EvalError::UnsupportedOperand {
            op: "SELECT OBJECTS".to_string(),
            value: other.type_name().to_string(),
        })),
    }
}

/// Grow an object set to everything it retains, walking the dominator tree
/// down from each member
fn expand_retained(outcome: QueryOutcome, ctx: &EvaluationContext) -> Result<QueryOutcome> {
    let ids = match outcome {
        QueryOutcome::Objects(ids) => ids,
        other => {
            return Err(anyhow::anyhow!(EvalError::UnsupportedOperand {
                op: "AS RETAINED SET".to_string(),
                value: format!("{} rows", other.row_count()),
            }))
        }
    };
    let snapshot = ctx.require_snapshot()?;
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut out = Vec::new();
    let mut stack: Vec<ObjectId> = ids;
    while let Some(id) = stack.pop() {
        check_canceled(ctx)?;
        if !seen.insert(id) {
            continue;
        }
        out.push(id);
        stack.extend(snapshot.immediate_dominated(id)?);
    }
    out.sort_unstable();
    Ok(QueryOutcome::Objects(out))
}

fn dedup(outcome: QueryOutcome) -> QueryOutcome {
    match outcome {
        QueryOutcome::Objects(ids) => {
            let mut seen = HashSet::new();
            QueryOutcome::Objects(ids.into_iter().filter(|id| seen.insert(*id)).collect())
        }
        QueryOutcome::Values(values) => {
            let mut out: Vec<Value> = Vec::new();
            for v in values {
                if !out.iter().any(|k| values_equal(k, &v)) {
                    out.push(v);
                }
            }
            QueryOutcome::Values(out)
        }
        QueryOutcome::Table(t) => {
            let mut rows: Vec<Vec<Value>> = Vec::new();
            for row in t.rows {
                if !rows.contains(&row) {
                    rows.push(row);
                }
            }
            QueryOutcome::Table(ResultTable {
                columns: t.columns,
                rows,
            })
        }
    }
}

fn merge(into: &mut QueryOutcome, addition: QueryOutcome) -> Result<()> {
    match (into, addition) {
        (QueryOutcome::Objects(a), QueryOutcome::Objects(b)) => {
            a.extend(b);
            Ok(())
        }
        (QueryOutcome::Values(a), QueryOutcome::Values(b)) => {
            a.extend(b);
            Ok(())
        }
        (QueryOutcome::Table(a), QueryOutcome::Table(b)) => {
            if a.columns != b.columns {
                return Err(anyhow::anyhow!(
                    "UNION branches select different columns ({:?} vs {:?})",
                    a.columns,
                    b.columns
                ));
            }
            a.rows.extend(b.rows);
            Ok(())
        }
        _ => Err(anyhow::anyhow!(
            "UNION branches produce incompatible result shapes"
        )),
    }
}
