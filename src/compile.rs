/// Node constructors, one per grammar production
///
/// The bundled parser goes through these functions exclusively, and an
/// external driver (anything that tokenizes OQL on its own) can do the same.
/// Work that should happen once per query rather than once per row lives
/// here: LIKE and class-name patterns are compiled at construction time, and
/// nested AND/OR chains are folded into binary nodes.
use anyhow::Result;

use crate::query::ir::{
    BinaryOp, CachedPattern, Expr, FunctionKind, IndexExpr, PathBase, PathSegment, Query,
    SubQueryExpr,
};
use crate::value::Value;

/// Compile pattern text to an anchored regex.
///
/// OQL patterns match the whole subject string, so the pattern is wrapped in
/// `^(?:...)$`. The same normalization serves LIKE, class-name patterns in
/// FROM clauses, and the implicit string-to-pattern coercion of method
/// arguments.
pub fn compile_pattern(text: &str) -> Result<CachedPattern> {
    let regex = regex::Regex::new(&format!("^(?:{text})$"))?;
    Ok(CachedPattern {
        source: text.to_string(),
        regex,
    })
}

pub fn constant(value: Value) -> Expr {
    Expr::Constant(value)
}

pub fn list_literal(items: Vec<Expr>) -> Expr {
    Expr::ListLiteral(items)
}

/// A bare identifier: an alias reference or the first attribute of the
/// ambient subject
pub fn ident(name: &str) -> Expr {
    Expr::Path {
        base: PathBase::Ident(name.to_string()),
        segments: Vec::new(),
    }
}

/// A path that starts at the ambient subject, e.g. a leading `@` attribute
pub fn implicit_path() -> Expr {
    Expr::Path {
        base: PathBase::Implicit,
        segments: Vec::new(),
    }
}

/// Append an attribute step. Existing paths are extended in place; any other
/// expression becomes the base of a new path.
pub fn attribute(base: Expr, name: &str, native: bool) -> Expr {
    let segment = PathSegment {
        name: name.to_string(),
        native,
    };
    match base {
        Expr::Path {
            base,
            mut segments,
        } => {
            segments.push(segment);
            Expr::Path { base, segments }
        }
        other => Expr::Path {
            base: PathBase::Expr(Box::new(other)),
            segments: vec![segment],
        },
    }
}

pub fn method_call(subject: Expr, name: &str, args: Vec<Expr>) -> Expr {
    Expr::MethodCall {
        subject: Box::new(subject),
        name: name.to_string(),
        args,
    }
}

pub fn index(subject: Expr, at: Expr) -> Expr {
    Expr::Index(IndexExpr::new(subject, at, None))
}

pub fn slice(subject: Expr, from: Expr, to: Expr) -> Expr {
    Expr::Index(IndexExpr::new(subject, from, Some(to)))
}

pub fn function(kind: FunctionKind, arg: Expr) -> Expr {
    Expr::Function {
        kind,
        arg: Box::new(arg),
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Op {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn and(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::And, lhs, rhs)
}

pub fn or(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Or, lhs, rhs)
}

pub fn equal(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Equal, lhs, rhs)
}

pub fn not_equal(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::NotEqual, lhs, rhs)
}

pub fn greater_than(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::GreaterThan, lhs, rhs)
}

pub fn greater_than_or_equal(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::GreaterThanOrEqual, lhs, rhs)
}

pub fn less_than(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::LessThan, lhs, rhs)
}

pub fn less_than_or_equal(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::LessThanOrEqual, lhs, rhs)
}

pub fn plus(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Plus, lhs, rhs)
}

pub fn minus(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Minus, lhs, rhs)
}

pub fn multiply(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Multiply, lhs, rhs)
}

pub fn divide(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Divide, lhs, rhs)
}

pub fn in_(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::In, lhs, rhs)
}

pub fn not_in(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::NotIn, lhs, rhs)
}

pub fn like(subject: Expr, pattern_text: &str) -> Result<Expr> {
    Ok(Expr::Like {
        subject: Box::new(subject),
        pattern: compile_pattern(pattern_text)?,
        negated: false,
    })
}

pub fn not_like(subject: Expr, pattern_text: &str) -> Result<Expr> {
    Ok(Expr::Like {
        subject: Box::new(subject),
        pattern: compile_pattern(pattern_text)?,
        negated: true,
    })
}

pub fn instance_of(subject: Expr, class_name: &str) -> Expr {
    Expr::InstanceOf {
        subject: Box::new(subject),
        class_name: class_name.to_string(),
    }
}

pub fn subquery(query: Query) -> Expr {
    Expr::SubQuery(SubQueryExpr::new(query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_are_anchored() {
        let p = compile_pattern("java\\.util\\..*").unwrap();
        assert!(p.regex.is_match("java.util.ArrayList"));
        assert!(!p.regex.is_match("xjava.util.ArrayList"));
        assert!(!p.regex.is_match("java.util"));
    }

    #[test]
    fn attribute_extends_paths_and_wraps_other_exprs() {
        let p = attribute(attribute(ident("s"), "a", false), "b", true);
        assert_eq!(p.to_string(), "s.a.@b");

        let m = method_call(ident("s"), "toString", vec![]);
        let p2 = attribute(m, "length", false);
        assert_eq!(p2.to_string(), "s.toString().length");
    }

    #[test]
    fn canonical_operator_text() {
        let e = and(
            equal(ident("s"), constant(Value::Int(5))),
            or(ident("a"), ident("b")),
        );
        assert_eq!(e.to_string(), "(s = 5) and (a or b)");
    }
}
