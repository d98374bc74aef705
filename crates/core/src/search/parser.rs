//! Recursive-descent parser for filter expressions.
//!
//! ```text
//! expr    := and ( OR and )*
//! and     := unary ( AND unary )*
//! unary   := NOT unary | primary
//! primary := '(' expr ')' | IDENT op value
//! op      := == | != | < | <= | > | >= | CONTAINS | PREFIX
//! value   := STRING | NUMBER | IDENT
//! ```
//!
//! Keywords are case-insensitive. Strings take single or double quotes with `\`
//! escapes. A bare identifier on the right-hand side is a string literal.
//!
//! `NOT` and parentheses may nest at most [`MAX_FILTER_DEPTH`] levels. Chains of
//! `AND`/`OR` are folded into balanced trees, so evaluating a long chain stays
//! logarithmic in stack depth.

use crate::config::MAX_FILTER_DEPTH;
use crate::error::{Result, VectorDbError};
use crate::search::filter::{CompareOp, Filter, Literal};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Op(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Eof,
}

fn err(position: usize, message: impl Into<String>) -> VectorDbError {
    VectorDbError::FilterParse {
        position,
        message: message.into(),
    }
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek_char() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    /// Next token and the byte offset it starts at.
    fn next_token(&mut self) -> Result<(Token, usize)> {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.bump();
        }
        let start = self.pos;
        let Some(c) = self.bump() else {
            return Ok((Token::Eof, start));
        };
        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '=' if self.eat('=') => Token::Op(CompareOp::Eq),
            '!' if self.eat('=') => Token::Op(CompareOp::Ne),
            '<' if self.eat('=') => Token::Op(CompareOp::Le),
            '<' => Token::Op(CompareOp::Lt),
            '>' if self.eat('=') => Token::Op(CompareOp::Ge),
            '>' => Token::Op(CompareOp::Gt),
            '"' | '\'' => Token::Str(self.string(c, start)?),
            c if c == '-' || c.is_ascii_digit() => self.number(start)?,
            c if c.is_alphabetic() || c == '_' => self.word(start),
            other => return Err(err(start, format!("unexpected character '{other}'"))),
        };
        Ok((token, start))
    }

    fn string(&mut self, quote: char, start: usize) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(err(start, "unterminated string literal")),
                Some('\\') => match self.bump() {
                    Some(escaped) => out.push(escaped),
                    None => return Err(err(start, "unterminated string literal")),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self, start: usize) -> Result<Token> {
        while let Some(c) = self.peek_char() {
            let exponent_sign = (c == '+' || c == '-') && matches!(self.src[..self.pos].chars().last(), Some('e' | 'E'));
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| err(start, format!("invalid number '{text}'")))
    }

    fn word(&mut self, start: usize) -> Token {
        while self
            .peek_char()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            self.bump();
        }
        let text = &self.src[start..self.pos];
        match text.to_ascii_uppercase().as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "NOT" => Token::Not,
            "CONTAINS" => Token::Op(CompareOp::Contains),
            "PREFIX" => Token::Op(CompareOp::Prefix),
            _ => Token::Ident(text.to_string()),
        }
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    at: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self> {
        let mut lexer = Lexer::new(src);
        let (current, at) = lexer.next_token()?;
        Ok(Self { lexer, current, at })
    }

    fn advance(&mut self) -> Result<Token> {
        let (next, at) = self.lexer.next_token()?;
        self.at = at;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expr(&mut self, depth: usize) -> Result<Filter> {
        let first = self.and(depth)?;
        let mut rest = Vec::new();
        while self.current == Token::Or {
            self.advance()?;
            rest.push(self.and(depth)?);
        }
        Ok(balanced(first, rest, Filter::or))
    }

    fn and(&mut self, depth: usize) -> Result<Filter> {
        let first = self.unary(depth)?;
        let mut rest = Vec::new();
        while self.current == Token::And {
            self.advance()?;
            rest.push(self.unary(depth)?);
        }
        Ok(balanced(first, rest, Filter::and))
    }

    fn unary(&mut self, depth: usize) -> Result<Filter> {
        if self.current == Token::Not {
            let depth = self.descend(depth)?;
            self.advance()?;
            return Ok(self.unary(depth)?.negate());
        }
        self.primary(depth)
    }

    fn descend(&self, depth: usize) -> Result<usize> {
        if depth >= MAX_FILTER_DEPTH {
            return Err(err(
                self.at,
                format!("expression nested deeper than {MAX_FILTER_DEPTH} levels"),
            ));
        }
        Ok(depth + 1)
    }

    fn primary(&mut self, depth: usize) -> Result<Filter> {
        let at = self.at;
        match self.advance()? {
            Token::LParen => {
                let inner = self.expr(self.descend(depth)?)?;
                if self.current != Token::RParen {
                    return Err(err(self.at, "expected ')'"));
                }
                self.advance()?;
                Ok(inner)
            }
            Token::Ident(key) => {
                let op_at = self.at;
                let Token::Op(op) = self.advance()? else {
                    return Err(err(op_at, format!("expected comparison operator after '{key}'")));
                };
                let value_at = self.at;
                let value = match self.advance()? {
                    Token::Str(s) | Token::Ident(s) => Literal::Text(s),
                    Token::Number(n) if !matches!(op, CompareOp::Contains | CompareOp::Prefix) => {
                        Literal::Number(n)
                    }
                    _ => return Err(err(value_at, "expected a value")),
                };
                Ok(Filter::Compare { key, op, value })
            }
            Token::Eof => Err(err(at, "unexpected end of expression")),
            _ => Err(err(at, "expected a field name, NOT or '('")),
        }
    }
}

/// Joins `first` and `rest` pairwise, left to right, until one filter remains.
fn balanced(first: Filter, rest: Vec<Filter>, join: fn(Filter, Filter) -> Filter) -> Filter {
    let mut terms = Vec::with_capacity(rest.len() + 1);
    terms.push(first);
    terms.extend(rest);
    loop {
        match <[Filter; 1]>::try_from(terms) {
            Ok([only]) => return only,
            Err(level) => {
                let mut next = Vec::with_capacity(level.len().div_ceil(2));
                let mut iter = level.into_iter();
                while let Some(left) = iter.next() {
                    next.push(match iter.next() {
                        Some(right) => join(left, right),
                        None => left,
                    });
                }
                terms = next;
            }
        }
    }
}

/// Parses `src` into a [`Filter`]. Errors carry the byte offset of the offending token.
pub fn parse(src: &str) -> Result<Filter> {
    let mut parser = Parser::new(src)?;
    let filter = parser.expr(0)?;
    if parser.current != Token::Eof {
        return Err(err(parser.at, "unexpected trailing input"));
    }
    Ok(filter)
}
