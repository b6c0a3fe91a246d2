/// Runtime values produced by OQL expression evaluation
///
/// The evaluator is dynamically typed: every expression computes to a `Value`,
/// and the operators decide at run time whether the operand shapes are
/// acceptable. Numeric variants mirror the primitive widths found in heap
/// dumps, because promotion rules (int -> long -> double) are observable
/// through arithmetic and comparison results.
use std::fmt;

/// The identifier the snapshot assigns to every heap object (classes included).
pub type ObjectId = i32;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// A materialized sequence (native arrays, range views, list literals)
    List(Vec<Value>),
    /// A named-column row produced by a sub-select (map-style attribute lookup)
    Row(Vec<(String, Value)>),
    /// A reference to a heap object, resolved through the snapshot on demand
    Object(ObjectId),
    /// An object-id array, as returned by inbounds/outbounds/dominators
    Ids(Vec<ObjectId>),
    /// A full sub-query result
    Table(ResultTable),
}

/// The tabular result of a query with an explicit select list
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Width ranking used by binary numeric promotion. Byte, short and char all
/// occupy the int rank, as in Java's binary numeric promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NumKind {
    Int,
    Long,
    Float,
    Double,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Short(_) => "short",
            Value::Char(_) => "char",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Row(_) => "Row",
            Value::Object(_) => "Object",
            Value::Ids(_) => "int[]",
            Value::Table(_) => "ResultTable",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn numeric_kind(&self) -> Option<NumKind> {
        match self {
            Value::Byte(_) | Value::Short(_) | Value::Char(_) | Value::Int(_) => Some(NumKind::Int),
            Value::Long(_) => Some(NumKind::Long),
            Value::Float(_) => Some(NumKind::Float),
            Value::Double(_) => Some(NumKind::Double),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric_kind().is_some()
    }

    /// The integral reading of a numeric value (floating values truncate)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(b) => Some(i64::from(*b)),
            Value::Short(s) => Some(i64::from(*s)),
            Value::Char(c) => Some(i64::from(u32::from(*c))),
            Value::Int(i) => Some(i64::from(*i)),
            Value::Long(l) => Some(*l),
            Value::Float(f) => Some(*f as i64),
            Value::Double(d) => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Byte(b) => Some(f64::from(*b)),
            Value::Short(s) => Some(f64::from(*s)),
            Value::Char(c) => Some(f64::from(u32::from(*c))),
            Value::Int(i) => Some(f64::from(*i)),
            Value::Long(l) => Some(*l as f64),
            Value::Float(f) => Some(f64::from(*f)),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Array subscripts must be byte, short or int. Wider numeric types are
    /// rejected so that an accidental long-valued index surfaces as an error
    /// instead of silently truncating.
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Value::Byte(b) => Some(i64::from(*b)),
            Value::Short(s) => Some(i64::from(*s)),
            Value::Int(i) => Some(i64::from(*i)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Byte(b) => write!(f, "{b}"),
            Value::Short(s) => write!(f, "{s}"),
            Value::Char(c) => write!(f, "{c}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Long(l) => write!(f, "{l}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Double(x) => write!(f, "{x:?}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Row(cols) => {
                write!(f, "{{")?;
                for (i, (name, v)) in cols.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}={v}")?;
                }
                write!(f, "}}")
            }
            Value::Object(id) => write!(f, "<object #{id}>"),
            Value::Ids(ids) => {
                write!(f, "[")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "#{id}")?;
                }
                write!(f, "]")
            }
            Value::Table(t) => write!(f, "<table {}x{}>", t.rows.len(), t.columns.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_kind_ranks_widen() {
        assert!(NumKind::Int < NumKind::Long);
        assert!(NumKind::Long < NumKind::Float);
        assert!(NumKind::Float < NumKind::Double);
    }

    #[test]
    fn byte_short_char_occupy_int_rank() {
        assert_eq!(Value::Byte(1).numeric_kind(), Some(NumKind::Int));
        assert_eq!(Value::Short(1).numeric_kind(), Some(NumKind::Int));
        assert_eq!(Value::Char('a').numeric_kind(), Some(NumKind::Int));
        assert_eq!(Value::Long(1).numeric_kind(), Some(NumKind::Long));
    }

    #[test]
    fn index_rejects_wide_types() {
        assert_eq!(Value::Int(3).as_index(), Some(3));
        assert_eq!(Value::Byte(-1).as_index(), Some(-1));
        assert_eq!(Value::Long(3).as_index(), None);
        assert_eq!(Value::Double(3.0).as_index(), None);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::String("abc".into()).to_string(), "abc");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Int(2)]).to_string(),
            "[1, 2]"
        );
        assert_eq!(Value::Ids(vec![7, 8]).to_string(), "[#7, #8]");
    }
}
