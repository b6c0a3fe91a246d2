/// The OQL abstract syntax tree
///
/// Nodes are built once (by the parser or by the `compile` constructors) and
/// never mutated afterwards. The one piece of interior state, the sub-query
/// memo, caches evaluation results and is invisible to `Display`.
///
/// `Display` produces the canonical OQL text for a node. That text is load
/// bearing: it names unnamed select columns, it is what the UNION merge
/// compares, and it is what error messages quote.
use std::cell::RefCell;
use std::fmt;
use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;

use crate::value::{ObjectId, Value};

/// A LIKE pattern or class-name pattern, compiled once at construction time.
///
/// The original text is kept for canonical serialization and for equality;
/// two patterns are the same exactly when their sources are.
#[derive(Debug, Clone)]
pub struct CachedPattern {
    pub source: String,
    pub regex: regex::Regex,
}

impl PartialEq for CachedPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Plus,
    Minus,
    Multiply,
    Divide,
    And,
    Or,
    In,
    NotIn,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "!=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
        }
    }
}

/// Built-in functions taking a single argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    ToHex,
    ToString,
    Inbounds,
    Outbounds,
    Dominators,
    DominatorOf,
    ClassOf,
}

impl FunctionKind {
    pub fn name(&self) -> &'static str {
        match self {
            FunctionKind::ToHex => "toHex",
            FunctionKind::ToString => "toString",
            FunctionKind::Inbounds => "inbounds",
            FunctionKind::Outbounds => "outbounds",
            FunctionKind::Dominators => "dominators",
            FunctionKind::DominatorOf => "dominatorof",
            FunctionKind::ClassOf => "classof",
        }
    }

    pub fn from_name(name: &str) -> Option<FunctionKind> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "tohex" => Some(FunctionKind::ToHex),
            "tostring" => Some(FunctionKind::ToString),
            "inbounds" => Some(FunctionKind::Inbounds),
            "outbounds" => Some(FunctionKind::Outbounds),
            "dominators" => Some(FunctionKind::Dominators),
            "dominatorof" => Some(FunctionKind::DominatorOf),
            "classof" => Some(FunctionKind::ClassOf),
            _ => None,
        }
    }
}

/// One step of a dotted attribute path. Native segments (`@name`) address the
/// heap object itself rather than a field stored in the dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub native: bool,
}

/// Where a path starts resolving
#[derive(Debug, Clone)]
pub enum PathBase {
    /// The subject bound in the evaluation context
    Implicit,
    /// A leading identifier: either an alias in scope or the first attribute
    /// of the ambient subject (decided at evaluation time)
    Ident(String),
    /// Any other expression, e.g. a method-call result
    Expr(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Constant(Value),
    /// A bracketed list literal, `[a, b, c]`
    ListLiteral(Vec<Expr>),
    Path {
        base: PathBase,
        segments: Vec<PathSegment>,
    },
    Index(IndexExpr),
    MethodCall {
        subject: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Function {
        kind: FunctionKind,
        arg: Box<Expr>,
    },
    Op {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Like {
        subject: Box<Expr>,
        pattern: CachedPattern,
        negated: bool,
    },
    InstanceOf {
        subject: Box<Expr>,
        class_name: String,
    },
    SubQuery(SubQueryExpr),
}

/// `arr[i]` or the half-open range `arr[i:j]`
#[derive(Debug, Clone)]
pub struct IndexExpr {
    pub subject: Box<Expr>,
    pub from: Box<Expr>,
    pub to: Option<Box<Expr>>,
    pub(crate) cache: ExtractionCache,
}

impl IndexExpr {
    pub fn new(subject: Expr, from: Expr, to: Option<Expr>) -> Self {
        IndexExpr {
            subject: Box::new(subject),
            from: Box::new(from),
            to: to.map(Box::new),
            cache: ExtractionCache::new(),
        }
    }
}

/// Bounded entry-id cache for extractable collections, owned by the indexing
/// expression. Purely a performance cache: a miss recomputes through the
/// snapshot.
pub(crate) struct ExtractionCache(RefCell<LruCache<ObjectId, Rc<Vec<ObjectId>>>>);

const EXTRACTION_CACHE_CAPACITY: usize = 16;

impl ExtractionCache {
    fn new() -> Self {
        let cap = NonZeroUsize::new(EXTRACTION_CACHE_CAPACITY).unwrap();
        ExtractionCache(RefCell::new(LruCache::new(cap)))
    }

    pub(crate) fn lookup(&self, id: ObjectId) -> Option<Rc<Vec<ObjectId>>> {
        self.0.borrow_mut().get(&id).cloned()
    }

    pub(crate) fn store(&self, id: ObjectId, entries: Rc<Vec<ObjectId>>) {
        self.0.borrow_mut().put(id, entries);
    }
}

impl fmt::Debug for ExtractionCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ExtractionCache({} entries)", self.0.borrow().len())
    }
}

impl Clone for ExtractionCache {
    fn clone(&self) -> Self {
        // A cloned expression starts with a cold cache
        ExtractionCache::new()
    }
}

/// A query embedded in an expression tree.
///
/// Dependency analysis is deferred to the first `compute` call: if no clause
/// of the wrapped query depends on the enclosing context, the query runs once
/// and the result is memoized for the lifetime of this node.
#[derive(Debug, Clone)]
pub struct SubQueryExpr {
    pub query: Box<Query>,
    pub(crate) memo: RefCell<SubQueryMemo>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SubQueryMemo {
    pub(crate) dependent: Option<bool>,
    pub(crate) cached: Option<Value>,
}

impl SubQueryExpr {
    pub fn new(query: Query) -> Self {
        SubQueryExpr {
            query: Box::new(query),
            memo: RefCell::new(SubQueryMemo::default()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectItem {
    pub name: Option<String>,
    pub expr: Expr,
}

impl SelectItem {
    /// The column name shown for this item; unnamed items fall back to the
    /// canonical text of their expression
    pub fn column_name(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => self.expr.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectClause {
    pub distinct: bool,
    /// `SELECT AS RETAINED SET ...`
    pub retained_set: bool,
    /// `SELECT OBJECTS ...`: interpret the select values as heap objects
    pub as_objects: bool,
    /// Empty means `SELECT *`
    pub items: Vec<SelectItem>,
}

/// The single row source of a query. Exactly one source kind exists per
/// clause; the enum makes the invariant structural rather than checked.
#[derive(Debug, Clone)]
pub enum FromSource {
    ClassName(String),
    Pattern(CachedPattern),
    ObjectIds(Vec<ObjectId>),
    ObjectAddresses(Vec<u64>),
    SubQuery(Box<Query>),
    Expression(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct FromClause {
    pub source: FromSource,
    pub alias: Option<String>,
    /// `FROM OBJECTS ...`: iterate the class objects themselves instead of
    /// their instances
    pub include_objects: bool,
    /// `FROM INSTANCEOF ...`: include subclasses of the named class
    pub include_subclasses: bool,
}

impl FromClause {
    pub fn new(source: FromSource) -> Self {
        FromClause {
            source,
            alias: None,
            include_objects: false,
            include_subclasses: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    pub select: SelectClause,
    pub from: FromClause,
    pub where_clause: Option<Expr>,
    pub unions: Vec<Query>,
}

// ---------------------------------------------------------------------------
// Canonical serialization

fn write_quoted(f: &mut fmt::Formatter, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            _ => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

/// Parenthesize operand expressions that are themselves operations, so the
/// canonical text re-parses with the same shape
fn write_operand(f: &mut fmt::Formatter, e: &Expr) -> fmt::Result {
    match e {
        Expr::Op { .. } | Expr::Like { .. } | Expr::InstanceOf { .. } => write!(f, "({e})"),
        _ => write!(f, "{e}"),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Constant(v) => match v {
                Value::String(s) => write_quoted(f, s),
                Value::Char(c) => write!(f, "'{c}'"),
                Value::Long(l) => write!(f, "{l}L"),
                other => write!(f, "{other}"),
            },
            Expr::ListLiteral(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Expr::Path { base, segments } => {
                let mut need_dot = false;
                match base {
                    PathBase::Implicit => {}
                    PathBase::Ident(name) => {
                        write!(f, "{name}")?;
                        need_dot = true;
                    }
                    PathBase::Expr(e) => {
                        write_operand(f, e)?;
                        need_dot = true;
                    }
                }
                for seg in segments {
                    if need_dot {
                        write!(f, ".")?;
                    }
                    if seg.native {
                        write!(f, "@")?;
                    }
                    write!(f, "{}", seg.name)?;
                    need_dot = true;
                }
                Ok(())
            }
            Expr::Index(ie) => {
                write_operand(f, &ie.subject)?;
                write!(f, "[{}", ie.from)?;
                if let Some(to) = &ie.to {
                    write!(f, ":{to}")?;
                }
                write!(f, "]")
            }
            Expr::MethodCall {
                subject,
                name,
                args,
            } => {
                write_operand(f, subject)?;
                write!(f, ".{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Function { kind, arg } => write!(f, "{}({})", kind.name(), arg),
            Expr::Op { op, lhs, rhs } => {
                write_operand(f, lhs)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, rhs)
            }
            Expr::Like {
                subject,
                pattern,
                negated,
            } => {
                write_operand(f, subject)?;
                if *negated {
                    write!(f, " not like ")?;
                } else {
                    write!(f, " like ")?;
                }
                write_quoted(f, &pattern.source)
            }
            Expr::InstanceOf {
                subject,
                class_name,
            } => {
                write_operand(f, subject)?;
                write!(f, " implements {class_name}")
            }
            Expr::SubQuery(sq) => write!(f, "({})", sq.query),
        }
    }
}

impl fmt::Display for FromSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FromSource::ClassName(name) => write!(f, "{name}"),
            FromSource::Pattern(p) => write_quoted(f, &p.source),
            FromSource::ObjectIds(ids) => {
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{id}")?;
                }
                Ok(())
            }
            FromSource::ObjectAddresses(addrs) => {
                for (i, a) in addrs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "0x{a:x}")?;
                }
                Ok(())
            }
            FromSource::SubQuery(q) => write!(f, "({q})"),
            FromSource::Expression(e) => write!(f, "({e})"),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.select.distinct {
            write!(f, "DISTINCT ")?;
        }
        if self.select.retained_set {
            write!(f, "AS RETAINED SET ")?;
        }
        if self.select.as_objects {
            write!(f, "OBJECTS ")?;
        }
        if self.select.items.is_empty() {
            write!(f, "*")?;
        } else {
            for (i, item) in self.select.items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item.expr)?;
                if let Some(name) = &item.name {
                    write!(f, " AS {name}")?;
                }
            }
        }
        write!(f, " FROM ")?;
        if self.from.include_objects {
            write!(f, "OBJECTS ")?;
        }
        if self.from.include_subclasses {
            write!(f, "INSTANCEOF ")?;
        }
        write!(f, "{}", self.from.source)?;
        if let Some(alias) = &self.from.alias {
            write!(f, " {alias}")?;
        }
        if let Some(w) = &self.where_clause {
            write!(f, " WHERE {w}")?;
        }
        for u in &self.unions {
            write!(f, " UNION ({u})")?;
        }
        Ok(())
    }
}
