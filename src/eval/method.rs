/// Method calls on computed values
///
/// Calls dispatch through a static registry keyed by receiver kind and
/// method name. Each entry is an ordered overload list: candidates are tried
/// in two passes, first those whose parameters match the argument shapes
/// exactly, then those reachable by numeric widening, and within a pass the
/// declaration order decides (so `remove(int)` is preferred over
/// `remove(Object)` for an integer argument). Every resolved call is checked
/// against the session's method filter before it runs.
use std::collections::HashMap;

use anyhow::Result;
use once_cell::sync::Lazy;

use crate::compile;
use crate::eval::context::EvaluationContext;
use crate::eval::errors::EvalError;
use crate::eval::operation::values_equal;
use crate::eval::string_form;
use crate::query::ir::Expr;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ReceiverKind {
    Str,
    List,
    Num,
    Object,
}

fn receiver_kind(v: &Value) -> Option<ReceiverKind> {
    match v {
        Value::String(_) | Value::Char(_) => Some(ReceiverKind::Str),
        Value::List(_) | Value::Ids(_) => Some(ReceiverKind::List),
        Value::Object(_) => Some(ReceiverKind::Object),
        v if v.is_numeric() => Some(ReceiverKind::Num),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamType {
    /// byte, short or int; the only types accepted as subscripts
    Int,
    /// Any numeric value
    Num,
    Str,
    /// A string argument compiled to an anchored pattern before the call
    Pattern,
    Any,
}

impl ParamType {
    /// Pass-one matching: the argument already has the parameter's shape
    fn matches_exact(&self, arg: &Value) -> bool {
        match self {
            ParamType::Int => arg.as_index().is_some(),
            ParamType::Num => arg.is_numeric(),
            ParamType::Str | ParamType::Pattern => {
                matches!(arg, Value::String(_) | Value::Char(_))
            }
            ParamType::Any => true,
        }
    }

    /// Pass-two matching: numeric widening is allowed
    fn matches_widened(&self, arg: &Value) -> bool {
        match self {
            ParamType::Int | ParamType::Num => arg.is_numeric(),
            _ => self.matches_exact(arg),
        }
    }
}

type Handler = fn(&EvaluationContext, &Value, &[Value]) -> Result<Value>;

struct MethodSig {
    /// Qualified class name checked against the method filter
    declaring: &'static str,
    name: &'static str,
    params: &'static [ParamType],
    handler: Handler,
}

static METHODS: Lazy<HashMap<(ReceiverKind, &'static str), Vec<MethodSig>>> = Lazy::new(|| {
    let mut m: HashMap<(ReceiverKind, &'static str), Vec<MethodSig>> = HashMap::new();
    let mut add = |kind: ReceiverKind, sig: MethodSig| {
        let overloads = m.entry((kind, sig.name)).or_default();
        // registry bug if two overloads are indistinguishable
        assert!(
            !overloads.iter().any(|o| o.params == sig.params),
            "duplicate overload {}.{}",
            sig.declaring,
            sig.name
        );
        overloads.push(sig);
    };

    use ParamType::{Any, Int, Pattern, Str};
    use ReceiverKind::{List, Num, Object};

    const STRING: &str = "java.lang.String";
    add(ReceiverKind::Str, sig(STRING, "length", &[], str_length));
    add(ReceiverKind::Str, sig(STRING, "substring", &[Int], str_substring_from));
    add(ReceiverKind::Str, sig(STRING, "substring", &[Int, Int], str_substring));
    add(ReceiverKind::Str, sig(STRING, "startsWith", &[Str], str_starts_with));
    add(ReceiverKind::Str, sig(STRING, "endsWith", &[Str], str_ends_with));
    add(ReceiverKind::Str, sig(STRING, "contains", &[Str], str_contains));
    add(ReceiverKind::Str, sig(STRING, "indexOf", &[Str], str_index_of));
    add(ReceiverKind::Str, sig(STRING, "charAt", &[Int], str_char_at));
    add(ReceiverKind::Str, sig(STRING, "isEmpty", &[], str_is_empty));
    add(ReceiverKind::Str, sig(STRING, "toLowerCase", &[], str_to_lower));
    add(ReceiverKind::Str, sig(STRING, "toUpperCase", &[], str_to_upper));
    add(ReceiverKind::Str, sig(STRING, "trim", &[], str_trim));
    add(ReceiverKind::Str, sig(STRING, "matches", &[Pattern], str_matches));
    add(ReceiverKind::Str, sig(STRING, "equals", &[Any], any_equals));

    const LIST: &str = "java.util.List";
    add(List, sig(LIST, "size", &[], list_size));
    add(List, sig(LIST, "isEmpty", &[], list_is_empty));
    add(List, sig(LIST, "get", &[Int], list_get));
    add(List, sig(LIST, "contains", &[Any], list_contains));
    add(List, sig(LIST, "indexOf", &[Any], list_index_of));
    add(List, sig(LIST, "subList", &[Int, Int], list_sub_list));
    // remove(int) first: an integer argument must resolve to the positional
    // overload, as it would in Java
    add(List, sig(LIST, "remove", &[Int], list_remove_at));
    add(List, sig(LIST, "remove", &[Any], list_remove_value));

    const NUMBER: &str = "java.lang.Number";
    add(Num, sig(NUMBER, "intValue", &[], num_int_value));
    add(Num, sig(NUMBER, "longValue", &[], num_long_value));
    add(Num, sig(NUMBER, "floatValue", &[], num_float_value));
    add(Num, sig(NUMBER, "doubleValue", &[], num_double_value));
    add(Num, sig(NUMBER, "equals", &[Any], any_equals));

    const HEAP_OBJECT: &str = "heapql.model.HeapObject";
    add(Object, sig(HEAP_OBJECT, "getObjectId", &[], obj_object_id));
    add(Object, sig(HEAP_OBJECT, "getObjectAddress", &[], obj_address));
    add(Object, sig(HEAP_OBJECT, "getClazz", &[], obj_clazz));
    add(Object, sig(HEAP_OBJECT, "getUsedHeapSize", &[], obj_used_heap));
    add(
        Object,
        sig(HEAP_OBJECT, "getRetainedHeapSize", &[], obj_retained_heap),
    );
    add(
        Object,
        sig(HEAP_OBJECT, "getDisplayName", &[], obj_display_name),
    );
    add(Object, sig("java.lang.Class", "getName", &[], class_name));

    m
});

fn sig(
    declaring: &'static str,
    name: &'static str,
    params: &'static [ParamType],
    handler: Handler,
) -> MethodSig {
    MethodSig {
        declaring,
        name,
        params,
        handler,
    }
}

pub(crate) fn compute_method_call(
    subject: &Expr,
    name: &str,
    args: &[Expr],
    ctx: &EvaluationContext,
) -> Result<Value> {
    let receiver = subject.compute(ctx)?;
    if receiver.is_null() {
        return Ok(Value::Null);
    }
    let mut arg_values = Vec::with_capacity(args.len());
    for a in args {
        arg_values.push(a.compute(ctx)?);
    }

    // toString works on every receiver and cannot be filtered away
    if name == "toString" && arg_values.is_empty() {
        return Ok(Value::String(string_form(&receiver, ctx)?));
    }

    let kind = receiver_kind(&receiver)
        .ok_or_else(|| no_such_method(name, arg_values.len(), &receiver))?;
    let overloads = METHODS
        .get(&(kind, name))
        .ok_or_else(|| no_such_method(name, arg_values.len(), &receiver))?;

    let chosen = select_overload(overloads, &arg_values)
        .ok_or_else(|| no_such_method(name, arg_values.len(), &receiver))?;

    ctx.require_session()?
        .policy
        .check(chosen.declaring, name)?;

    let coerced = coerce_args(chosen, arg_values)?;
    (chosen.handler)(ctx, &receiver, &coerced)
}

fn select_overload<'m>(overloads: &'m [MethodSig], args: &[Value]) -> Option<&'m MethodSig> {
    let arity_matches = |s: &&MethodSig| s.params.len() == args.len();
    overloads
        .iter()
        .filter(arity_matches)
        .find(|s| {
            s.params
                .iter()
                .zip(args)
                .all(|(p, a)| p.matches_exact(a))
        })
        .or_else(|| {
            overloads.iter().filter(arity_matches).find(|s| {
                s.params
                    .iter()
                    .zip(args)
                    .all(|(p, a)| p.matches_widened(a))
            })
        })
}

/// Pattern parameters are compiled once per call; everything else passes
/// through unchanged
fn coerce_args(sig: &MethodSig, args: Vec<Value>) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(args.len());
    for (p, a) in sig.params.iter().zip(args) {
        match (p, a) {
            (ParamType::Pattern, Value::Char(c)) => out.push(Value::String(c.to_string())),
            (ParamType::Str, Value::Char(c)) => out.push(Value::String(c.to_string())),
            (_, a) => out.push(a),
        }
    }
    Ok(out)
}

fn no_such_method(name: &str, arity: usize, receiver: &Value) -> anyhow::Error {
    anyhow::anyhow!(EvalError::NoSuchMethod {
        name: name.to_string(),
        arity,
        on: receiver.type_name().to_string(),
    })
}

// -- handler helpers --------------------------------------------------------

fn text_of(receiver: &Value) -> String {
    match receiver {
        Value::String(s) => s.clone(),
        Value::Char(c) => c.to_string(),
        other => other.to_string(),
    }
}

fn str_arg(args: &[Value], i: usize) -> &str {
    match &args[i] {
        Value::String(s) => s,
        _ => "",
    }
}

fn int_arg(args: &[Value], i: usize) -> i64 {
    args[i].as_i64().unwrap_or_default()
}

/// Clamp a Java-style substring index into the char bounds
fn char_index(i: i64, len: usize) -> usize {
    i.clamp(0, len as i64) as usize
}

// -- string methods ---------------------------------------------------------

fn str_length(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Int(text_of(recv).chars().count() as i32))
}

fn str_substring_from(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    let chars: Vec<char> = text_of(recv).chars().collect();
    let lo = char_index(int_arg(args, 0), chars.len());
    Ok(Value::String(chars[lo..].iter().collect()))
}

fn str_substring(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    let chars: Vec<char> = text_of(recv).chars().collect();
    let lo = char_index(int_arg(args, 0), chars.len());
    let hi = char_index(int_arg(args, 1), chars.len()).max(lo);
    Ok(Value::String(chars[lo..hi].iter().collect()))
}

fn str_starts_with(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::Boolean(text_of(recv).starts_with(str_arg(args, 0))))
}

fn str_ends_with(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::Boolean(text_of(recv).ends_with(str_arg(args, 0))))
}

fn str_contains(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::Boolean(text_of(recv).contains(str_arg(args, 0))))
}

fn str_index_of(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    let text = text_of(recv);
    let needle = str_arg(args, 0);
    match text.find(needle) {
        Some(byte_pos) => Ok(Value::Int(text[..byte_pos].chars().count() as i32)),
        None => Ok(Value::Int(-1)),
    }
}

fn str_char_at(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    let text = text_of(recv);
    let i = int_arg(args, 0);
    if i < 0 {
        return Ok(Value::Null);
    }
    match text.chars().nth(i as usize) {
        Some(c) => Ok(Value::Char(c)),
        None => Ok(Value::Null),
    }
}

fn str_is_empty(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Boolean(text_of(recv).is_empty()))
}

fn str_to_lower(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::String(text_of(recv).to_lowercase()))
}

fn str_to_upper(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::String(text_of(recv).to_uppercase()))
}

fn str_trim(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::String(text_of(recv).trim().to_string()))
}

fn str_matches(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    let pattern = compile::compile_pattern(str_arg(args, 0))?;
    Ok(Value::Boolean(pattern.regex.is_match(&text_of(recv))))
}

fn any_equals(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::Boolean(values_equal(recv, &args[0])))
}

// -- list methods -----------------------------------------------------------

fn list_items(recv: &Value) -> Vec<Value> {
    match recv {
        Value::List(items) => items.clone(),
        Value::Ids(ids) => ids.iter().map(|id| Value::Object(*id)).collect(),
        _ => Vec::new(),
    }
}

fn list_size(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Int(list_items(recv).len() as i32))
}

fn list_is_empty(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Boolean(list_items(recv).is_empty()))
}

fn list_get(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    let items = list_items(recv);
    let i = int_arg(args, 0);
    if i < 0 || i as usize >= items.len() {
        return Ok(Value::Null);
    }
    Ok(items[i as usize].clone())
}

fn list_contains(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::Boolean(
        list_items(recv).iter().any(|v| values_equal(v, &args[0])),
    ))
}

fn list_index_of(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    let pos = list_items(recv)
        .iter()
        .position(|v| values_equal(v, &args[0]));
    Ok(Value::Int(pos.map(|p| p as i32).unwrap_or(-1)))
}

fn list_sub_list(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    let items = list_items(recv);
    let lo = int_arg(args, 0).clamp(0, items.len() as i64) as usize;
    let hi = (int_arg(args, 1).clamp(0, items.len() as i64) as usize).max(lo);
    Ok(Value::List(items[lo..hi].to_vec()))
}

fn list_remove_at(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    // values are immutable here; the positional form reads the element it
    // would have removed
    let items = list_items(recv);
    let i = int_arg(args, 0);
    if i < 0 || i as usize >= items.len() {
        return Ok(Value::Null);
    }
    Ok(items[i as usize].clone())
}

fn list_remove_value(_: &EvaluationContext, recv: &Value, args: &[Value]) -> Result<Value> {
    Ok(Value::Boolean(
        list_items(recv).iter().any(|v| values_equal(v, &args[0])),
    ))
}

// -- numeric methods --------------------------------------------------------

fn num_int_value(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Int(recv.as_i64().unwrap_or_default() as i32))
}

fn num_long_value(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Long(recv.as_i64().unwrap_or_default()))
}

fn num_float_value(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Float(recv.as_f64().unwrap_or_default() as f32))
}

fn num_double_value(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Double(recv.as_f64().unwrap_or_default()))
}

// -- heap object methods ----------------------------------------------------

fn object_id(recv: &Value) -> i32 {
    match recv {
        Value::Object(id) => *id,
        _ => 0,
    }
}

fn obj_object_id(_: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    Ok(Value::Int(object_id(recv)))
}

fn obj_address(ctx: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    let snapshot = ctx.require_snapshot()?;
    Ok(Value::Long(snapshot.object_address(object_id(recv))? as i64))
}

fn obj_clazz(ctx: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    let snapshot = ctx.require_snapshot()?;
    Ok(Value::Object(snapshot.class_of(object_id(recv))?))
}

fn obj_used_heap(ctx: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    let snapshot = ctx.require_snapshot()?;
    Ok(Value::Long(snapshot.used_heap_size(object_id(recv))?))
}

fn obj_retained_heap(ctx: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    let snapshot = ctx.require_snapshot()?;
    Ok(Value::Long(snapshot.retained_heap_size(object_id(recv))?))
}

fn obj_display_name(ctx: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    let snapshot = ctx.require_snapshot()?;
    Ok(Value::String(snapshot.display_name(object_id(recv))?))
}

fn class_name(ctx: &EvaluationContext, recv: &Value, _: &[Value]) -> Result<Value> {
    let snapshot = ctx.require_snapshot()?;
    Ok(Value::String(snapshot.class_info(object_id(recv))?.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_ordered_overloads() {
        let substr = METHODS.get(&(ReceiverKind::Str, "substring")).unwrap();
        assert_eq!(substr.len(), 2);
        let one_arg = select_overload(substr, &[Value::Int(1)]).unwrap();
        assert_eq!(one_arg.params, [ParamType::Int].as_slice());

        let remove = METHODS.get(&(ReceiverKind::List, "remove")).unwrap();
        let positional = select_overload(remove, &[Value::Int(0)]).unwrap();
        assert_eq!(positional.params, [ParamType::Int].as_slice());
        let by_value = select_overload(remove, &[Value::String("x".into())]).unwrap();
        assert_eq!(by_value.params, [ParamType::Any].as_slice());
    }

    #[test]
    fn declaring_classes_are_qualified_names() {
        let size = METHODS.get(&(ReceiverKind::List, "size")).unwrap();
        assert_eq!(size[0].declaring, "java.util.List");
        let get_name = METHODS.get(&(ReceiverKind::Object, "getName")).unwrap();
        assert_eq!(get_name[0].declaring, "java.lang.Class");
    }
}
