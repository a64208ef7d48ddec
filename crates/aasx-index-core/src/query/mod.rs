//! Filter language for document listings.
//!
//! ```text
//! Or      := And ('||' And)*
//! And     := Term ('&&' Term)*
//! Term    := '(' Or ')' | Quoted | Words | Element
//! Element := '#' Abbrev [':' IdShortPattern] [Op Value]
//! Op      := '=' | '!=' | '<' | '<=' | '>' | '>='
//! Value   := Quoted | Literal | Literal '...' Literal
//! ```
//!
//! A text term matches documents whose endpoint name, id, or idShort
//! contains it (case-insensitive). An element term matches documents with
//! at least one element row of that model type, idShort, and value.
//! Value types are inferred from the literal: `true`/`false`, `123n`,
//! numbers, ISO dates, and everything else as strings.
//!
//! The same AST compiles to two targets:
//!
//! | Target | Module | Used by |
//! |--------|--------|---------|
//! | In-memory predicate | [`predicate`] | memory and file backends |
//! | Parameterized SQL fragment | [`sql`] | SQLite backend |
//!
//! Malformed filters never surface as errors: they compile to a
//! predicate that matches nothing and to an empty fragment.

pub mod parser;
pub mod predicate;
pub mod sql;

pub use parser::parse;
pub use predicate::Predicate;
pub use sql::{SqlFragment, SqlParam};

use crate::models::TypedValue;

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Or(Vec<Expression>),
    And(Vec<Expression>),
    /// Implicit substring match against endpoint, id, and idShort.
    Text(String),
    Element(ElementPredicate),
}

/// `#<abbrev>[:<idShortPattern>][<op><value>]`
#[derive(Debug, Clone, PartialEq)]
pub struct ElementPredicate {
    /// Lowercase model-type abbreviation.
    pub model_type: String,
    pub id_short: Option<String>,
    pub comparison: Option<Comparison>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Value(Operator, TypedValue),
    /// Inclusive `low...high`; `Eq` means inside, `Ne` outside.
    Range {
        operator: Operator,
        low: TypedValue,
        high: TypedValue,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn is_equality(self) -> bool {
        matches!(self, Operator::Eq | Operator::Ne)
    }

    pub fn sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }

    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Operator::Eq => ordering == Equal,
            Operator::Ne => ordering != Equal,
            Operator::Lt => ordering == Less,
            Operator::Le => ordering != Greater,
            Operator::Gt => ordering == Greater,
            Operator::Ge => ordering != Less,
        }
    }
}

/// Treats a missing or blank filter as "no filter".
pub fn normalize_filter(filter: Option<&str>) -> Option<&str> {
    filter.map(str::trim).filter(|f| !f.is_empty())
}
