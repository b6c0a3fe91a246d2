use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unexpected character `{0}` at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),
    #[error("invalid numeric literal `{0}`")]
    InvalidNumber(String),
    #[error("unexpected token `{0}` at offset {1}; expected {2}")]
    Unexpected(String, usize, String),
    #[error("unexpected end of query; expected {0}")]
    UnexpectedEnd(String),
    #[error("LIKE requires a string-literal pattern")]
    NonLiteralPattern,
    #[error("a FROM list may not mix object ids and object addresses")]
    MixedFromList,
    #[error("unknown built-in function `{0}`")]
    UnknownFunction(String),
}
