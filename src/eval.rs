/// Expression evaluation
///
/// `Expr::compute` is the single entry point: it dispatches each node kind to
/// its module and owns the two behaviors that cut across them, short-circuit
/// logic and sub-query memoization.
pub mod context;
pub mod errors;
pub mod policy;

mod function;
mod index;
mod method;
mod operation;
mod path;

pub(crate) use operation::values_equal;

use anyhow::Result;

use crate::eval::context::EvaluationContext;
use crate::eval::errors::EvalError;
use crate::exec;
use crate::query::ir::{BinaryOp, Expr, FromSource, PathBase, Query};
use crate::value::Value;

impl Expr {
    pub fn compute(&self, ctx: &EvaluationContext) -> Result<Value> {
        match self {
            Expr::Constant(v) => Ok(v.clone()),
            Expr::ListLiteral(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.compute(ctx)?);
                }
                Ok(Value::List(out))
            }
            Expr::Path { base, segments } => path::compute_path(base, segments, ctx),
            Expr::Index(ie) => index::compute_index(ie, ctx),
            Expr::MethodCall {
                subject,
                name,
                args,
            } => method::compute_method_call(subject, name, args, ctx),
            Expr::Function { kind, arg } => function::compute_function(*kind, arg, ctx),
            Expr::Op { op, lhs, rhs } => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let l = to_bool(&lhs.compute(ctx)?)?;
                    match (op, l) {
                        (BinaryOp::Or, true) => Ok(Value::Boolean(true)),
                        (BinaryOp::And, false) => Ok(Value::Boolean(false)),
                        _ => Ok(Value::Boolean(to_bool(&rhs.compute(ctx)?)?)),
                    }
                }
                _ => {
                    let l = lhs.compute(ctx)?;
                    let r = rhs.compute(ctx)?;
                    operation::apply(*op, &l, &r, &lhs.to_string(), &rhs.to_string(), ctx)
                }
            },
            Expr::Like {
                subject,
                pattern,
                negated,
            } => {
                let v = subject.compute(ctx)?;
                // a null subject fails LIKE and NOT LIKE alike
                if v.is_null() {
                    return Ok(Value::Boolean(false));
                }
                let text = string_form(&v, ctx)?;
                let matched = pattern.regex.is_match(&text);
                Ok(Value::Boolean(matched != *negated))
            }
            Expr::InstanceOf {
                subject,
                class_name,
            } => {
                let v = subject.compute(ctx)?;
                match v {
                    Value::Null => Ok(Value::Boolean(false)),
                    Value::Object(id) => {
                        let snapshot = ctx.require_snapshot()?;
                        let session = ctx.require_session()?;
                        let class_id = snapshot.class_of(id)?;
                        let names = session.type_names(snapshot, class_id)?;
                        Ok(Value::Boolean(names.contains(class_name)))
                    }
                    other => Err(anyhow::anyhow!(EvalError::UnsupportedOperand {
                        op: "implements".to_string(),
                        value: other.type_name().to_string(),
                    })),
                }
            }
            Expr::SubQuery(sq) => {
                let dependent = {
                    let mut memo = sq.memo.borrow_mut();
                    *memo
                        .dependent
                        .get_or_insert_with(|| query_is_context_dependent(&sq.query, ctx))
                };
                if !dependent {
                    if let Some(cached) = sq.memo.borrow().cached.clone() {
                        return Ok(cached);
                    }
                }
                let result = exec::execute_as_value(&sq.query, ctx)?;
                if !dependent {
                    sq.memo.borrow_mut().cached = Some(result.clone());
                }
                Ok(result)
            }
        }
    }

    /// Whether evaluating this expression can read anything bound by `ctx`
    /// or its parents. A sub-query whose clauses are all independent of the
    /// enclosing chain runs once and is memoized.
    pub fn is_context_dependent(&self, ctx: &EvaluationContext) -> bool {
        match self {
            Expr::Constant(_) => false,
            Expr::ListLiteral(items) => items.iter().any(|i| i.is_context_dependent(ctx)),
            Expr::Path { base, segments: _ } => match base {
                PathBase::Implicit => ctx.has_subject(),
                PathBase::Ident(name) => ctx.has_alias(name),
                PathBase::Expr(e) => e.is_context_dependent(ctx),
            },
            Expr::Index(ie) => {
                ie.subject.is_context_dependent(ctx)
                    || ie.from.is_context_dependent(ctx)
                    || ie
                        .to
                        .as_ref()
                        .map(|t| t.is_context_dependent(ctx))
                        .unwrap_or(false)
            }
            Expr::MethodCall {
                subject,
                name: _,
                args,
            } => {
                subject.is_context_dependent(ctx)
                    || args.iter().any(|a| a.is_context_dependent(ctx))
            }
            Expr::Function { kind: _, arg } => arg.is_context_dependent(ctx),
            Expr::Op { op: _, lhs, rhs } => {
                lhs.is_context_dependent(ctx) || rhs.is_context_dependent(ctx)
            }
            Expr::Like { subject, .. } => subject.is_context_dependent(ctx),
            Expr::InstanceOf { subject, .. } => subject.is_context_dependent(ctx),
            Expr::SubQuery(sq) => query_is_context_dependent(&sq.query, ctx),
        }
    }
}

/// A query depends on the enclosing context when any of its clauses do
pub(crate) fn query_is_context_dependent(q: &Query, ctx: &EvaluationContext) -> bool {
    if let Some(w) = &q.where_clause {
        if w.is_context_dependent(ctx) {
            return true;
        }
    }
    if q.select
        .items
        .iter()
        .any(|i| i.expr.is_context_dependent(ctx))
    {
        return true;
    }
    match &q.from.source {
        FromSource::Expression(e) => {
            if e.is_context_dependent(ctx) {
                return true;
            }
        }
        FromSource::SubQuery(sub) => {
            if query_is_context_dependent(sub, ctx) {
                return true;
            }
        }
        _ => {}
    }
    q.unions.iter().any(|u| query_is_context_dependent(u, ctx))
}

/// The textual reading of a value; heap objects resolve to their display name
pub(crate) fn string_form(v: &Value, ctx: &EvaluationContext) -> Result<String> {
    match v {
        Value::Object(id) => {
            let snapshot = ctx.require_snapshot()?;
            Ok(snapshot.display_name(*id)?)
        }
        other => Ok(other.to_string()),
    }
}

pub(crate) fn to_bool(v: &Value) -> Result<bool> {
    v.as_bool()
        .ok_or_else(|| anyhow::anyhow!(EvalError::NotABoolean(v.to_string())))
}

/// Poll the listener, surfacing cancellation as a distinguishable error
pub(crate) fn check_canceled(ctx: &EvaluationContext) -> Result<()> {
    if let Some(progress) = ctx.progress() {
        if progress.is_canceled() {
            return Err(anyhow::anyhow!(EvalError::Canceled));
        }
    }
    Ok(())
}
