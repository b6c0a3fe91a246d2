/// Lexer and recursive-descent parser for OQL text
///
/// The parser owns tokenization and clause structure only; AST nodes are
/// built through the `compile` constructors so that parsed and
/// programmatically-built trees go through the same normalization.
use anyhow::Result;

use crate::compile;
use crate::query::error::ParseError;
use crate::query::ir::{
    Expr, FromClause, FromSource, FunctionKind, Query, SelectClause, SelectItem,
};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i32),
    Long(i64),
    Double(f64),
    /// Hexadecimal literal; an object address in FROM clauses, a long
    /// elsewhere
    Hex(u64),
    Str(String),
    CharLit(char),
    Symbol(&'static str),
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(s) => s.clone(),
            Tok::Int(n) => n.to_string(),
            Tok::Long(n) => format!("{n}L"),
            Tok::Double(d) => d.to_string(),
            Tok::Hex(h) => format!("0x{h:x}"),
            Tok::Str(s) => format!("\"{s}\""),
            Tok::CharLit(c) => format!("'{c}'"),
            Tok::Symbol(s) => (*s).to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
}

const SYMBOLS2: [&str; 3] = ["!=", "<=", ">="];
const SYMBOLS1: [&str; 13] = [
    "=", "<", ">", "+", "-", "*", "/", "(", ")", "[", "]", ",", ".",
];

fn lex(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let offset = i;
        if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            let mut end = i + 1;
            while end < chars.len()
                && (chars[end].is_ascii_alphanumeric() || chars[end] == '_' || chars[end] == '$')
            {
                end += 1;
            }
            let word: String = chars[i..end].iter().collect();
            tokens.push(Token {
                tok: Tok::Ident(word),
                offset,
            });
            i = end;
            continue;
        }
        if c.is_ascii_digit() {
            let (tok, end) = lex_number(&chars, i)?;
            tokens.push(Token { tok, offset });
            i = end;
            continue;
        }
        if c == '"' {
            let (s, end) = lex_quoted(&chars, i, '"')?;
            tokens.push(Token {
                tok: Tok::Str(s),
                offset,
            });
            i = end;
            continue;
        }
        if c == '\'' {
            let (s, end) = lex_quoted(&chars, i, '\'')?;
            let mut cs = s.chars();
            match (cs.next(), cs.next()) {
                (Some(ch), None) => {
                    tokens.push(Token {
                        tok: Tok::CharLit(ch),
                        offset,
                    });
                    i = end;
                    continue;
                }
                _ => return Err(anyhow::anyhow!(ParseError::UnexpectedChar('\'', offset))),
            }
        }
        if c == '@' || c == ':' {
            tokens.push(Token {
                tok: Tok::Symbol(if c == '@' { "@" } else { ":" }),
                offset,
            });
            i += 1;
            continue;
        }
        if i + 1 < chars.len() {
            let pair: String = chars[i..i + 2].iter().collect();
            if let Some(sym) = SYMBOLS2.iter().find(|s| **s == pair) {
                tokens.push(Token {
                    tok: Tok::Symbol(sym),
                    offset,
                });
                i += 2;
                continue;
            }
        }
        let single = c.to_string();
        if let Some(sym) = SYMBOLS1.iter().find(|s| **s == single) {
            tokens.push(Token {
                tok: Tok::Symbol(sym),
                offset,
            });
            i += 1;
            continue;
        }
        return Err(anyhow::anyhow!(ParseError::UnexpectedChar(c, offset)));
    }
    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize) -> Result<(Tok, usize)> {
    if chars[start] == '0'
        && start + 1 < chars.len()
        && (chars[start + 1] == 'x' || chars[start + 1] == 'X')
    {
        let mut end = start + 2;
        while end < chars.len() && chars[end].is_ascii_hexdigit() {
            end += 1;
        }
        let digits: String = chars[start + 2..end].iter().collect();
        let value = u64::from_str_radix(&digits, 16)
            .map_err(|_| ParseError::InvalidNumber(chars[start..end].iter().collect()))?;
        return Ok((Tok::Hex(value), end));
    }
    let mut end = start;
    let mut fractional = false;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    // A dot only starts a fraction if a digit follows, otherwise it is an
    // attribute access on a numeric literal
    if end + 1 < chars.len() && chars[end] == '.' && chars[end + 1].is_ascii_digit() {
        fractional = true;
        end += 1;
        while end < chars.len() && chars[end].is_ascii_digit() {
            end += 1;
        }
    }
    let text: String = chars[start..end].iter().collect();
    if fractional {
        let value: f64 = text
            .parse()
            .map_err(|_| ParseError::InvalidNumber(text.clone()))?;
        return Ok((Tok::Double(value), end));
    }
    if end < chars.len() && (chars[end] == 'l' || chars[end] == 'L') {
        let value: i64 = text
            .parse()
            .map_err(|_| ParseError::InvalidNumber(text.clone()))?;
        return Ok((Tok::Long(value), end + 1));
    }
    let value: i64 = text
        .parse()
        .map_err(|_| ParseError::InvalidNumber(text.clone()))?;
    match i32::try_from(value) {
        Ok(n) => Ok((Tok::Int(n), end)),
        Err(_) => Ok((Tok::Long(value), end)),
    }
}

fn lex_quoted(chars: &[char], start: usize, delim: char) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            c if c == delim => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or(ParseError::UnterminatedString(start))?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    other => out.push(*other),
                }
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(anyhow::anyhow!(ParseError::UnterminatedString(start)))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + ahead).map(|t| &t.tok)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn error_here(&self, expected: &str) -> anyhow::Error {
        match self.tokens.get(self.pos) {
            Some(t) => anyhow::anyhow!(ParseError::Unexpected(
                t.tok.describe(),
                t.offset,
                expected.to_string()
            )),
            None => anyhow::anyhow!(ParseError::UnexpectedEnd(expected.to_string())),
        }
    }

    /// Consume an identifier equal to `word` ignoring case
    fn eat_keyword(&mut self, word: &str) -> bool {
        if let Some(Tok::Ident(s)) = self.peek() {
            if s.eq_ignore_ascii_case(word) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn peek_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(s)) if s.eq_ignore_ascii_case(word))
    }

    fn expect_keyword(&mut self, word: &str) -> Result<()> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.error_here(word))
        }
    }

    fn eat_symbol(&mut self, sym: &str) -> bool {
        if let Some(Tok::Symbol(s)) = self.peek() {
            if *s == sym {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn expect_symbol(&mut self, sym: &str) -> Result<()> {
        if self.eat_symbol(sym) {
            Ok(())
        } else {
            Err(self.error_here(&format!("`{sym}`")))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<String> {
        match self.peek() {
            Some(Tok::Ident(_)) => match self.advance().map(|t| t.tok) {
                Some(Tok::Ident(s)) => Ok(s),
                _ => unreachable!(),
            },
            _ => Err(self.error_here(expected)),
        }
    }

    // -- query structure ----------------------------------------------------

    fn parse_query(&mut self) -> Result<Query> {
        self.expect_keyword("select")?;
        let select = self.parse_select_clause()?;
        self.expect_keyword("from")?;
        let from = self.parse_from_clause()?;
        let where_clause = if self.eat_keyword("where") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        let mut unions = Vec::new();
        while self.eat_keyword("union") {
            self.expect_symbol("(")?;
            unions.push(self.parse_query()?);
            self.expect_symbol(")")?;
        }
        Ok(Query {
            select,
            from,
            where_clause,
            unions,
        })
    }

    fn parse_select_clause(&mut self) -> Result<SelectClause> {
        let mut clause = SelectClause::default();
        if self.eat_keyword("distinct") {
            clause.distinct = true;
        }
        if self.eat_keyword("objects") {
            clause.as_objects = true;
        } else if self.peek_keyword("as") {
            self.pos += 1;
            self.expect_keyword("retained")?;
            self.expect_keyword("set")?;
            clause.retained_set = true;
        }
        if self.eat_symbol("*") {
            return Ok(clause);
        }
        loop {
            let expr = self.parse_expr()?;
            let name = if self.eat_keyword("as") {
                Some(match self.peek() {
                    Some(Tok::Str(_)) => match self.advance().map(|t| t.tok) {
                        Some(Tok::Str(s)) => s,
                        _ => unreachable!(),
                    },
                    _ => self.expect_ident("a column name")?,
                })
            } else {
                None
            };
            clause.items.push(SelectItem { name, expr });
            if !self.eat_symbol(",") {
                break;
            }
        }
        Ok(clause)
    }

    fn parse_from_clause(&mut self) -> Result<FromClause> {
        let mut include_objects = false;
        let mut include_subclasses = false;
        if self.eat_keyword("objects") {
            include_objects = true;
        }
        if self.eat_keyword("instanceof") {
            include_subclasses = true;
        }
        let source = self.parse_from_source()?;
        let mut clause = FromClause::new(source);
        clause.include_objects = include_objects;
        clause.include_subclasses = include_subclasses;
        if let Some(Tok::Ident(s)) = self.peek() {
            if !s.eq_ignore_ascii_case("where") && !s.eq_ignore_ascii_case("union") {
                clause.alias = Some(s.clone());
                self.pos += 1;
            }
        }
        Ok(clause)
    }

    fn parse_from_source(&mut self) -> Result<FromSource> {
        match self.peek() {
            Some(Tok::Int(_)) | Some(Tok::Long(_)) => self.parse_id_list(),
            Some(Tok::Hex(_)) => self.parse_address_list(),
            Some(Tok::Str(_)) => {
                let text = match self.advance().map(|t| t.tok) {
                    Some(Tok::Str(s)) => s,
                    _ => unreachable!(),
                };
                Ok(FromSource::Pattern(compile::compile_pattern(&text)?))
            }
            Some(Tok::Symbol("(")) => {
                self.pos += 1;
                if self.peek_keyword("select") {
                    let q = self.parse_query()?;
                    self.expect_symbol(")")?;
                    Ok(FromSource::SubQuery(Box::new(q)))
                } else {
                    let e = self.parse_expr()?;
                    self.expect_symbol(")")?;
                    Ok(FromSource::Expression(Box::new(e)))
                }
            }
            Some(Tok::Ident(_)) => {
                let name = self.parse_class_name()?;
                Ok(FromSource::ClassName(name))
            }
            _ => Err(self.error_here("a class name, pattern, id list or sub-query")),
        }
    }

    fn parse_id_list(&mut self) -> Result<FromSource> {
        let mut ids = Vec::new();
        loop {
            match self.advance().map(|t| t.tok) {
                Some(Tok::Int(n)) => ids.push(n),
                Some(Tok::Hex(_)) => return Err(anyhow::anyhow!(ParseError::MixedFromList)),
                _ => return Err(self.error_here("an object id")),
            }
            if !self.eat_symbol(",") {
                break;
            }
        }
        Ok(FromSource::ObjectIds(ids))
    }

    fn parse_address_list(&mut self) -> Result<FromSource> {
        let mut addrs = Vec::new();
        loop {
            match self.advance().map(|t| t.tok) {
                Some(Tok::Hex(a)) => addrs.push(a),
                Some(Tok::Int(_)) | Some(Tok::Long(_)) => {
                    return Err(anyhow::anyhow!(ParseError::MixedFromList))
                }
                _ => return Err(self.error_here("an object address")),
            }
            if !self.eat_symbol(",") {
                break;
            }
        }
        Ok(FromSource::ObjectAddresses(addrs))
    }

    /// A dotted class name, with optional `[]` suffixes for array classes
    fn parse_class_name(&mut self) -> Result<String> {
        let mut name = self.expect_ident("a class name")?;
        while self.peek() == Some(&Tok::Symbol("."))
            && matches!(self.peek_at(1), Some(Tok::Ident(_)))
        {
            self.pos += 1;
            name.push('.');
            name.push_str(&self.expect_ident("a class name part")?);
        }
        while self.peek() == Some(&Tok::Symbol("[")) && self.peek_at(1) == Some(&Tok::Symbol("]"))
        {
            self.pos += 2;
            name.push_str("[]");
        }
        Ok(name)
    }

    // -- expressions --------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = compile::or(lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_relational()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_relational()?;
            lhs = compile::and(lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let lhs = self.parse_additive()?;
        if self.eat_symbol("=") {
            return Ok(compile::equal(lhs, self.parse_additive()?));
        }
        if self.eat_symbol("!=") {
            return Ok(compile::not_equal(lhs, self.parse_additive()?));
        }
        if self.eat_symbol("<") {
            return Ok(compile::less_than(lhs, self.parse_additive()?));
        }
        if self.eat_symbol("<=") {
            return Ok(compile::less_than_or_equal(lhs, self.parse_additive()?));
        }
        if self.eat_symbol(">") {
            return Ok(compile::greater_than(lhs, self.parse_additive()?));
        }
        if self.eat_symbol(">=") {
            return Ok(compile::greater_than_or_equal(lhs, self.parse_additive()?));
        }
        if self.eat_keyword("like") {
            let pattern = self.pattern_literal()?;
            return compile::like(lhs, &pattern);
        }
        if self.eat_keyword("in") {
            return Ok(compile::in_(lhs, self.parse_additive()?));
        }
        if self.eat_keyword("implements") {
            let class_name = self.parse_class_name()?;
            return Ok(compile::instance_of(lhs, &class_name));
        }
        if self.peek_keyword("not") {
            self.pos += 1;
            if self.eat_keyword("like") {
                let pattern = self.pattern_literal()?;
                return compile::not_like(lhs, &pattern);
            }
            if self.eat_keyword("in") {
                return Ok(compile::not_in(lhs, self.parse_additive()?));
            }
            return Err(self.error_here("LIKE or IN after NOT"));
        }
        Ok(lhs)
    }

    fn pattern_literal(&mut self) -> Result<String> {
        match self.peek() {
            Some(Tok::Str(_)) => match self.advance().map(|t| t.tok) {
                Some(Tok::Str(s)) => Ok(s),
                _ => unreachable!(),
            },
            _ => Err(anyhow::anyhow!(ParseError::NonLiteralPattern)),
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            if self.eat_symbol("+") {
                lhs = compile::plus(lhs, self.parse_multiplicative()?);
            } else if self.eat_symbol("-") {
                lhs = compile::minus(lhs, self.parse_multiplicative()?);
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            if self.eat_symbol("*") {
                lhs = compile::multiply(lhs, self.parse_unary()?);
            } else if self.eat_symbol("/") {
                lhs = compile::divide(lhs, self.parse_unary()?);
            } else {
                return Ok(lhs);
            }
        }
    }

    /// Unary minus binds looser than postfix steps, so `-a.b` negates the
    /// whole path
    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat_symbol("-") {
            let inner = self.parse_unary()?;
            return Ok(negate(inner));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut e = self.parse_primary()?;
        loop {
            if self.eat_symbol(".") {
                let native = self.eat_symbol("@");
                let name = self.expect_ident("an attribute or method name")?;
                if self.peek() == Some(&Tok::Symbol("(")) {
                    let args = self.parse_call_args()?;
                    e = compile::method_call(e, &name, args);
                } else {
                    e = compile::attribute(e, &name, native);
                }
            } else if self.eat_symbol("[") {
                let from = self.parse_expr()?;
                if self.eat_symbol(":") {
                    let to = self.parse_expr()?;
                    self.expect_symbol("]")?;
                    e = compile::slice(e, from, to);
                } else {
                    self.expect_symbol("]")?;
                    e = compile::index(e, from);
                }
            } else {
                return Ok(e);
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>> {
        self.expect_symbol("(")?;
        let mut args = Vec::new();
        if self.eat_symbol(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat_symbol(")") {
                return Ok(args);
            }
            self.expect_symbol(",")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Tok::Int(n)) => {
                self.pos += 1;
                Ok(compile::constant(Value::Int(n)))
            }
            Some(Tok::Long(n)) => {
                self.pos += 1;
                Ok(compile::constant(Value::Long(n)))
            }
            Some(Tok::Double(d)) => {
                self.pos += 1;
                Ok(compile::constant(Value::Double(d)))
            }
            Some(Tok::Hex(h)) => {
                self.pos += 1;
                Ok(compile::constant(Value::Long(h as i64)))
            }
            Some(Tok::Str(s)) => {
                self.pos += 1;
                Ok(compile::constant(Value::String(s)))
            }
            Some(Tok::CharLit(c)) => {
                self.pos += 1;
                Ok(compile::constant(Value::Char(c)))
            }
            Some(Tok::Symbol("(")) => {
                self.pos += 1;
                if self.peek_keyword("select") {
                    let q = self.parse_query()?;
                    self.expect_symbol(")")?;
                    Ok(compile::subquery(q))
                } else {
                    let e = self.parse_expr()?;
                    self.expect_symbol(")")?;
                    Ok(e)
                }
            }
            Some(Tok::Symbol("[")) => {
                self.pos += 1;
                let mut items = Vec::new();
                if !self.eat_symbol("]") {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.eat_symbol("]") {
                            break;
                        }
                        self.expect_symbol(",")?;
                    }
                }
                Ok(compile::list_literal(items))
            }
            Some(Tok::Symbol("@")) => {
                self.pos += 1;
                let name = self.expect_ident("an attribute name")?;
                Ok(compile::attribute(compile::implicit_path(), &name, true))
            }
            Some(Tok::Ident(word)) => {
                if word.eq_ignore_ascii_case("true") {
                    self.pos += 1;
                    return Ok(compile::constant(Value::Boolean(true)));
                }
                if word.eq_ignore_ascii_case("false") {
                    self.pos += 1;
                    return Ok(compile::constant(Value::Boolean(false)));
                }
                if word.eq_ignore_ascii_case("null") {
                    self.pos += 1;
                    return Ok(compile::constant(Value::Null));
                }
                if self.peek_at(1) == Some(&Tok::Symbol("(")) {
                    self.pos += 1;
                    let kind = FunctionKind::from_name(&word)
                        .ok_or_else(|| ParseError::UnknownFunction(word.clone()))?;
                    let mut args = self.parse_call_args()?;
                    if args.len() != 1 {
                        return Err(anyhow::anyhow!(ParseError::Unexpected(
                            word,
                            0,
                            "exactly one argument".to_string()
                        )));
                    }
                    return Ok(compile::function(kind, args.remove(0)));
                }
                self.pos += 1;
                Ok(compile::ident(&word))
            }
            _ => Err(self.error_here("an expression")),
        }
    }
}

/// Fold unary minus into numeric constants; anything else becomes `0 - e`
fn negate(e: Expr) -> Expr {
    match e {
        Expr::Constant(Value::Int(n)) => compile::constant(Value::Int(-n)),
        Expr::Constant(Value::Long(n)) => compile::constant(Value::Long(-n)),
        Expr::Constant(Value::Double(d)) => compile::constant(Value::Double(-d)),
        other => compile::minus(compile::constant(Value::Int(0)), other),
    }
}

/// Parse a complete OQL query; trailing input is an error
pub fn parse(text: &str) -> Result<Query> {
    let tokens = lex(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let query = parser.parse_query()?;
    if let Some(t) = parser.tokens.get(parser.pos) {
        return Err(anyhow::anyhow!(ParseError::Unexpected(
            t.tok.describe(),
            t.offset,
            "end of query".to_string()
        )));
    }
    Ok(query)
}

/// Parse a standalone expression, for embedding hosts that evaluate snippets
/// outside a full query
pub fn parse_expression(text: &str) -> Result<Expr> {
    let tokens = lex(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if let Some(t) = parser.tokens.get(parser.pos) {
        return Err(anyhow::anyhow!(ParseError::Unexpected(
            t.tok.describe(),
            t.offset,
            "end of expression".to_string()
        )));
    }
    Ok(expr)
}
