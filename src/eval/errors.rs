use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("`{expr}` is null in `{op}`")]
    NullOperand { expr: String, op: String },
    #[error("cannot compare {lhs} to {rhs}")]
    NotComparable { lhs: String, rhs: String },
    #[error("`{0}` is not a number")]
    NotANumber(String),
    #[error("operator `{op}` is not defined for {value}")]
    UnsupportedOperand { op: String, value: String },
    #[error("index `{0}` must be an integer, got {1}")]
    InvalidIndexType(String, String),
    #[error("`{subject}` cannot be indexed")]
    NotIndexable { subject: String },
    #[error("unknown attribute `{name}` on {on}")]
    UnknownAttribute { name: String, on: String },
    #[error("no method `{name}` with {arity} argument(s) on {on}")]
    NoSuchMethod {
        name: String,
        arity: usize,
        on: String,
    },
    #[error("calling `{qualified}` is blocked by the method filter `{policy}`")]
    AccessDenied { qualified: String, policy: String },
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("the right-hand side of IN must be a list, id set or table, got {0}")]
    BadInOperand(String),
    #[error("expected a boolean, got `{0}`")]
    NotABoolean(String),
    #[error("query canceled")]
    Canceled,
}
