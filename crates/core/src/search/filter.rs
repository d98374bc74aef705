//! Metadata filter expressions.
//!
//! A [`Filter`] is a predicate tree over a record's [`Metadata`]. Comparisons
//! against a numeric literal parse the metadata value as `f64` (unparsable values
//! never match); comparisons against a string literal compare the raw value
//! lexicographically. A missing key fails every comparison, including `!=`.
//!
//! Expressions are usually built by [`Filter::parse`]; see [`crate::search::parser`].

use crate::error::Result;
use crate::vector::Metadata;
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of a leaf predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Substring match.
    Contains,
    /// Starts-with match.
    Prefix,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Contains => "CONTAINS",
            CompareOp::Prefix => "PREFIX",
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
            CompareOp::Contains | CompareOp::Prefix => false,
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
    Compare {
        key: String,
        op: CompareOp,
        value: Literal,
    },
}

impl Filter {
    /// Parses a filter expression such as `category == "A" AND score >= 0.5`.
    pub fn parse(expr: &str) -> Result<Filter> {
        super::parser::parse(expr)
    }

    /// `key == "value"` on the raw string.
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Filter {
        Filter::Compare {
            key: key.into(),
            op: CompareOp::Eq,
            value: Literal::Text(value.into()),
        }
    }

    pub fn and(self, other: Filter) -> Filter {
        Filter::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Filter {
        Filter::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Filter {
        Filter::Not(Box::new(self))
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Filter::And(l, r) => l.matches(metadata) && r.matches(metadata),
            Filter::Or(l, r) => l.matches(metadata) || r.matches(metadata),
            Filter::Not(inner) => !inner.matches(metadata),
            Filter::Compare { key, op, value } => match metadata.get(key) {
                Some(actual) => compare(actual, *op, value),
                None => false,
            },
        }
    }
}

fn compare(actual: &str, op: CompareOp, value: &Literal) -> bool {
    match (op, value) {
        (CompareOp::Contains, Literal::Text(s)) => actual.contains(s.as_str()),
        (CompareOp::Prefix, Literal::Text(s)) => actual.starts_with(s.as_str()),
        (CompareOp::Contains | CompareOp::Prefix, Literal::Number(_)) => false,
        (_, Literal::Number(want)) => match actual.trim().parse::<f64>() {
            Ok(got) => got.partial_cmp(want).is_some_and(|ord| op.holds(ord)),
            Err(_) => false,
        },
        (_, Literal::Text(want)) => op.holds(actual.cmp(want.as_str())),
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Text(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\"")
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(l, r) => write!(f, "({l} AND {r})"),
            Filter::Or(l, r) => write!(f, "({l} OR {r})"),
            Filter::Not(inner) => write!(f, "NOT {inner}"),
            Filter::Compare { key, op, value } => write!(f, "{key} {} {value}", op.symbol()),
        }
    }
}

impl std::str::FromStr for Filter {
    type Err = crate::error::VectorDbError;

    fn from_str(s: &str) -> Result<Self> {
        Filter::parse(s)
    }
}
