//! # Reference Extraction
//!
//! Finds the dependency references declared by a record element.
//!
//! Two forms exist:
//! - literal references: `{"ref": "module.name"}` anywhere in the field
//!   tree, taken verbatim;
//! - embedded references: `{"eval": "..."}` values written in a restricted
//!   expression sub-language, where every call `ref('module.name')` with a
//!   single literal string argument contributes one reference.
//!
//! The expression sub-language is parsed into an AST and walked; it is
//! never evaluated. Any other function call, variable reference, or
//! non-literal argument is ignored — that is the soundness boundary of
//! dependency inference, not a bug. A syntactically invalid expression is
//! a hard error: an unparseable expression could hide references.

use crate::primitives::MAX_EXPR_DEPTH;
use crate::{CorpusError, RecordId};
use serde_json::Value;
use std::collections::BTreeSet;

/// The single function name whose literal-argument calls denote references.
const REF_FUNCTION: &str = "ref";

// =============================================================================
// RECORD-LEVEL EXTRACTION
// =============================================================================

/// Extract the de-duplicated, ordered reference list of a record element.
///
/// Unqualified references are attributed to `default_module`.
pub fn extract_refs(element: &Value, default_module: &str) -> Result<Vec<RecordId>, CorpusError> {
    let mut refs = Vec::new();
    let mut seen = BTreeSet::new();
    collect_refs(element, default_module, &mut refs, &mut seen)?;
    Ok(refs)
}

fn collect_refs(
    value: &Value,
    default_module: &str,
    refs: &mut Vec<RecordId>,
    seen: &mut BTreeSet<RecordId>,
) -> Result<(), CorpusError> {
    match value {
        Value::Object(map) => {
            if let Some(target) = map.get("ref").and_then(Value::as_str) {
                push_ref(RecordId::parse(target, default_module), refs, seen);
            }
            if let Some(source) = map.get("eval").and_then(Value::as_str) {
                let expr = parse_expression(source)?;
                for target in refs_in_expr(&expr) {
                    push_ref(RecordId::parse(&target, default_module), refs, seen);
                }
            }
            for inner in map.values() {
                collect_refs(inner, default_module, refs, seen)?;
            }
        }
        Value::Array(items) => {
            for inner in items {
                collect_refs(inner, default_module, refs, seen)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn push_ref(id: RecordId, refs: &mut Vec<RecordId>, seen: &mut BTreeSet<RecordId>) {
    if seen.insert(id.clone()) {
        refs.push(id);
    }
}

// =============================================================================
// EXPRESSION AST
// =============================================================================

/// A node of the restricted expression language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A string literal.
    Str(String),
    /// A numeric literal, kept as source text (never evaluated).
    Num(String),
    /// A bare identifier or keyword constant.
    Name(String),
    /// A unary operation.
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// A binary operation.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// A function or method call.
    Call { func: Box<Expr>, args: Vec<Expr> },
    /// Attribute access `value.attr`.
    Attribute { value: Box<Expr>, attr: String },
    /// Subscript `value[index]`.
    Index { value: Box<Expr>, index: Box<Expr> },
    /// A parenthesized tuple.
    Tuple(Vec<Expr>),
    /// A list display.
    List(Vec<Expr>),
    /// A dict display.
    Dict(Vec<(Expr, Expr)>),
}

/// Unary operators of the sub-language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

/// Binary operators of the sub-language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Walk an AST collecting the literal arguments of `ref(...)` calls.
///
/// Arguments are searched too: `ref('a') and ref('b')` or a `ref` call
/// nested inside another call's argument list both contribute.
#[must_use]
pub fn refs_in_expr(expr: &Expr) -> Vec<String> {
    let mut out = Vec::new();
    walk_expr(expr, &mut out);
    out
}

fn walk_expr(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Call { func, args } => {
            if let Expr::Name(name) = func.as_ref() {
                if name == REF_FUNCTION
                    && args.len() == 1
                    && let Expr::Str(target) = &args[0]
                {
                    out.push(target.clone());
                    return;
                }
            }
            walk_expr(func, out);
            for arg in args {
                walk_expr(arg, out);
            }
        }
        Expr::Unary { operand, .. } => walk_expr(operand, out),
        Expr::Binary { left, right, .. } => {
            walk_expr(left, out);
            walk_expr(right, out);
        }
        Expr::Attribute { value, .. } => walk_expr(value, out),
        Expr::Index { value, index } => {
            walk_expr(value, out);
            walk_expr(index, out);
        }
        Expr::Tuple(items) | Expr::List(items) => {
            for item in items {
                walk_expr(item, out);
            }
        }
        Expr::Dict(items) => {
            for (key, value) in items {
                walk_expr(key, out);
                walk_expr(value, out);
            }
        }
        Expr::Str(_) | Expr::Num(_) | Expr::Name(_) => {}
    }
}

// =============================================================================
// TOKENIZER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Str(String),
    Num(String),
    Ident(String),
    Punct(&'static str),
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> CorpusError {
        CorpusError::ExprSyntax {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<(usize, Token)>, CorpusError> {
        let mut tokens = Vec::new();
        while self.pos < self.bytes.len() {
            let start = self.pos;
            let byte = self.bytes[self.pos];
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' | b'\\' => {
                    // Backslash line continuations are whitespace here.
                    self.pos += 1;
                }
                b'\'' | b'"' => {
                    let text = self.string_literal(byte)?;
                    tokens.push((start, Token::Str(text)));
                }
                b'0'..=b'9' => {
                    let text = self.number_literal();
                    tokens.push((start, Token::Num(text)));
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    let text = self.identifier();
                    tokens.push((start, Token::Ident(text)));
                }
                _ => {
                    let punct = self.punct()?;
                    tokens.push((start, Token::Punct(punct)));
                }
            }
        }
        Ok(tokens)
    }

    fn string_literal(&mut self, quote: u8) -> Result<String, CorpusError> {
        self.pos += 1;
        let mut text = String::new();
        while self.pos < self.bytes.len() {
            let byte = self.bytes[self.pos];
            if byte == quote {
                self.pos += 1;
                return Ok(text);
            }
            if byte == b'\\' {
                self.pos += 1;
                let Some(&escaped) = self.bytes.get(self.pos) else {
                    return Err(self.error("unterminated escape in string literal"));
                };
                let resolved = match escaped {
                    b'n' => '\n',
                    b't' => '\t',
                    b'\\' => '\\',
                    b'\'' => '\'',
                    b'"' => '"',
                    other => other as char,
                };
                text.push(resolved);
                self.pos += 1;
                continue;
            }
            // Multi-byte characters pass through unchanged.
            let ch_len = self.char_len();
            text.push_str(&self.source[self.pos..self.pos + ch_len]);
            self.pos += ch_len;
        }
        Err(self.error("unterminated string literal"))
    }

    fn char_len(&self) -> usize {
        self.source[self.pos..]
            .chars()
            .next()
            .map_or(1, char::len_utf8)
    }

    fn number_literal(&mut self) -> String {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_digit() || *b == b'.')
        {
            self.pos += 1;
        }
        self.source[start..self.pos].to_string()
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            self.pos += 1;
        }
        self.source[start..self.pos].to_string()
    }

    fn punct(&mut self) -> Result<&'static str, CorpusError> {
        const TWO: [&str; 4] = ["==", "!=", "<=", ">="];
        const ONE: [&str; 14] = [
            "(", ")", "[", "]", "{", "}", ",", ":", ".", "+", "-", "*", "/", "%",
        ];
        let rest = &self.source[self.pos..];
        for punct in TWO {
            if rest.starts_with(punct) {
                self.pos += 2;
                return Ok(punct);
            }
        }
        if rest.starts_with('<') {
            self.pos += 1;
            return Ok("<");
        }
        if rest.starts_with('>') {
            self.pos += 1;
            return Ok(">");
        }
        for punct in ONE {
            if rest.starts_with(punct) {
                self.pos += 1;
                return Ok(punct);
            }
        }
        Err(self.error(format!(
            "unexpected character {:?}",
            rest.chars().next().unwrap_or('\0')
        )))
    }
}

// =============================================================================
// PARSER
// =============================================================================

/// Parse a source string of the restricted expression sub-language.
///
/// Recursive descent with a hard nesting bound. The grammar covers string,
/// number and name atoms, tuple/list/dict displays, calls, attribute and
/// subscript access, the usual comparison and arithmetic operators, and
/// `and`/`or`/`not`/`in`. Nothing is ever evaluated.
pub fn parse_expression(source: &str) -> Result<Expr, CorpusError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        source_len: source.len(),
    };
    let expr = parser.expression(0)?;
    if let Some(&(offset, _)) = parser.peek_entry() {
        return Err(CorpusError::ExprSyntax {
            offset,
            message: "trailing input after expression".to_string(),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    source_len: usize,
}

impl Parser {
    fn peek_entry(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_entry().map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.peek_entry().map_or(self.source_len, |(o, _)| *o)
    }

    fn error(&self, message: impl Into<String>) -> CorpusError {
        CorpusError::ExprSyntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), CorpusError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(format!("expected {punct:?}")))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == keyword) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn check_depth(&self, depth: usize) -> Result<(), CorpusError> {
        if depth > MAX_EXPR_DEPTH {
            return Err(self.error("expression nests too deeply"));
        }
        Ok(())
    }

    // expression := and_expr ('or' and_expr)*
    fn expression(&mut self, depth: usize) -> Result<Expr, CorpusError> {
        self.check_depth(depth)?;
        let mut left = self.and_expr(depth + 1)?;
        while self.eat_keyword("or") {
            let right = self.and_expr(depth + 1)?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self, depth: usize) -> Result<Expr, CorpusError> {
        self.check_depth(depth)?;
        let mut left = self.not_expr(depth + 1)?;
        while self.eat_keyword("and") {
            let right = self.not_expr(depth + 1)?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self, depth: usize) -> Result<Expr, CorpusError> {
        self.check_depth(depth)?;
        if self.eat_keyword("not") {
            let operand = self.not_expr(depth + 1)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison(depth + 1)
    }

    fn comparison(&mut self, depth: usize) -> Result<Expr, CorpusError> {
        self.check_depth(depth)?;
        let mut left = self.arith(depth + 1)?;
        loop {
            let op = if self.eat_punct("==") {
                BinaryOp::Eq
            } else if self.eat_punct("!=") {
                BinaryOp::Ne
            } else if self.eat_punct("<=") {
                BinaryOp::Le
            } else if self.eat_punct(">=") {
                BinaryOp::Ge
            } else if self.eat_punct("<") {
                BinaryOp::Lt
            } else if self.eat_punct(">") {
                BinaryOp::Gt
            } else if self.eat_keyword("in") {
                BinaryOp::In
            } else if matches!(self.peek(), Some(Token::Ident(w)) if w == "not")
                && matches!(self.tokens.get(self.pos + 1), Some((_, Token::Ident(w))) if w == "in")
            {
                self.pos += 2;
                BinaryOp::NotIn
            } else {
                return Ok(left);
            };
            let right = self.arith(depth + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn arith(&mut self, depth: usize) -> Result<Expr, CorpusError> {
        self.check_depth(depth)?;
        let mut left = self.term(depth + 1)?;
        loop {
            let op = if self.eat_punct("+") {
                BinaryOp::Add
            } else if self.eat_punct("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.term(depth + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self, depth: usize) -> Result<Expr, CorpusError> {
        self.check_depth(depth)?;
        let mut left = self.unary(depth + 1)?;
        loop {
            let op = if self.eat_punct("*") {
                BinaryOp::Mul
            } else if self.eat_punct("/") {
                BinaryOp::Div
            } else if self.eat_punct("%") {
                BinaryOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.unary(depth + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self, depth: usize) -> Result<Expr, CorpusError> {
        self.check_depth(depth)?;
        let op = if self.eat_punct("-") {
            Some(UnaryOp::Neg)
        } else if self.eat_punct("+") {
            Some(UnaryOp::Pos)
        } else {
            None
        };
        if let Some(op) = op {
            let operand = self.unary(depth + 1)?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.postfix(depth + 1)
    }

    fn postfix(&mut self, depth: usize) -> Result<Expr, CorpusError> {
        self.check_depth(depth)?;
        let mut expr = self.atom(depth + 1)?;
        loop {
            if self.eat_punct("(") {
                let (args, _) = self.expr_list(")", depth + 1)?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat_punct("[") {
                let index = self.expression(depth + 1)?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_punct(".") {
                let Some(Token::Ident(attr)) = self.advance() else {
                    return Err(self.error("expected attribute name after '.'"));
                };
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn atom(&mut self, depth: usize) -> Result<Expr, CorpusError> {
        self.check_depth(depth)?;
        match self.peek().cloned() {
            Some(Token::Str(text)) => {
                self.pos += 1;
                Ok(Expr::Str(text))
            }
            Some(Token::Num(text)) => {
                self.pos += 1;
                Ok(Expr::Num(text))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(Expr::Name(name))
            }
            Some(Token::Punct("(")) => {
                self.pos += 1;
                let (mut items, trailing_comma) = self.expr_list(")", depth + 1)?;
                // A single parenthesized expression is not a tuple.
                if items.len() == 1 && !trailing_comma {
                    return Ok(items.remove(0));
                }
                Ok(Expr::Tuple(items))
            }
            Some(Token::Punct("[")) => {
                self.pos += 1;
                let (items, _) = self.expr_list("]", depth + 1)?;
                Ok(Expr::List(items))
            }
            Some(Token::Punct("{")) => {
                self.pos += 1;
                let items = self.dict_items(depth + 1)?;
                Ok(Expr::Dict(items))
            }
            Some(_) => Err(self.error("expected an expression")),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    /// Parse a comma-separated expression list up to `close`.
    ///
    /// Also reports whether the list ended with a trailing comma, which is
    /// what distinguishes the one-element tuple `(x,)` from a
    /// parenthesized expression.
    fn expr_list(
        &mut self,
        close: &str,
        depth: usize,
    ) -> Result<(Vec<Expr>, bool), CorpusError> {
        let mut items = Vec::new();
        if self.eat_punct(close) {
            return Ok((items, false));
        }
        loop {
            items.push(self.expression(depth)?);
            if self.eat_punct(",") {
                if self.eat_punct(close) {
                    return Ok((items, true));
                }
                continue;
            }
            self.expect_punct(close)?;
            return Ok((items, false));
        }
    }

    fn dict_items(&mut self, depth: usize) -> Result<Vec<(Expr, Expr)>, CorpusError> {
        let mut items = Vec::new();
        if self.eat_punct("}") {
            return Ok(items);
        }
        loop {
            let key = self.expression(depth)?;
            self.expect_punct(":")?;
            let value = self.expression(depth)?;
            items.push((key, value));
            if self.eat_punct(",") {
                if self.eat_punct("}") {
                    return Ok(items);
                }
                continue;
            }
            self.expect_punct("}")?;
            return Ok(items);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
