//! Compilation of filter expressions to parameterized SQL.
//!
//! The fragment is a boolean SQL expression over the `documents` table
//! (unaliased) with `?` placeholders; [`SqlFragment::params`] lists the
//! bound values in placeholder order. Element predicates render as
//! independent `EXISTS` subqueries against `elements`, so `A && B` may be
//! satisfied by different rows, exactly like the in-memory predicate.
//!
//! Text terms are interpolated after escaping, not bound. String equality
//! renders as `LIKE`/`NOT LIKE`, which SQLite evaluates case-insensitively
//! for ASCII.

use tracing::warn;

use crate::models::TypedValue;

use super::{parse, Comparison, ElementPredicate, Expression, Operator};

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Real(f64),
    Integer(i64),
    Bool(bool),
}

/// Compiled SQL condition plus its bound parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl SqlFragment {
    /// Compiles `filter`. A malformed filter is logged and yields an empty
    /// fragment, which callers must treat as "matches nothing".
    pub fn compile(filter: &str, language: Option<&str>) -> Self {
        match parse(filter) {
            Ok(expr) => {
                let mut fragment = SqlFragment::default();
                fragment.sql = render(&expr, language, &mut fragment.params);
                fragment
            }
            Err(e) => {
                warn!(filter, error = %e, "ignoring malformed filter");
                SqlFragment::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

fn render(expr: &Expression, language: Option<&str>, params: &mut Vec<SqlParam>) -> String {
    match expr {
        Expression::Or(terms) => join(terms, " OR ", language, params),
        Expression::And(terms) => join(terms, " AND ", language, params),
        Expression::Text(text) => {
            let needle = sanitize(text);
            let conditions: Vec<String> = ["documents.endpoint", "documents.id", "documents.idShort"]
                .iter()
                .map(|column| format!("{} LIKE '%{}%' ESCAPE '\\'", column, needle))
                .collect();
            format!("({})", conditions.join(" OR "))
        }
        Expression::Element(predicate) => render_element(predicate, language, params),
    }
}

fn join(
    terms: &[Expression],
    separator: &str,
    language: Option<&str>,
    params: &mut Vec<SqlParam>,
) -> String {
    let parts: Vec<String> = terms
        .iter()
        .map(|t| render(t, language, params))
        .collect();
    format!("({})", parts.join(separator))
}

fn render_element(
    predicate: &ElementPredicate,
    language: Option<&str>,
    params: &mut Vec<SqlParam>,
) -> String {
    let mut sql = String::from(
        "EXISTS (SELECT 1 FROM elements e WHERE e.documentId = documents.uuid AND e.modelType = ?",
    );
    params.push(SqlParam::Text(predicate.model_type.clone()));

    if let Some(pattern) = &predicate.id_short {
        sql.push_str(" AND e.idShort LIKE ? ESCAPE '\\'");
        params.push(SqlParam::Text(format!("%{}%", escape_like(pattern))));
    }

    if let Some(language) = language {
        sql.push_str(" AND (e.language IS NULL OR e.language = ?)");
        params.push(SqlParam::Text(language.to_string()));
    }

    match &predicate.comparison {
        None => {}
        Some(Comparison::Value(operator, value)) => match (value, operator) {
            (TypedValue::String(text), Operator::Eq | Operator::Ne) => {
                let like = if *operator == Operator::Eq {
                    "LIKE"
                } else {
                    "NOT LIKE"
                };
                sql.push_str(&format!(" AND e.stringValue {} ? ESCAPE '\\'", like));
                params.push(SqlParam::Text(escape_like(text)));
            }
            _ => {
                let conditions: Vec<String> = columns_for(value)
                    .iter()
                    .map(|column| {
                        params.push(param_for(value));
                        format!("e.{} {} ?", column, operator.sql())
                    })
                    .collect();
                sql.push_str(&format!(" AND ({})", conditions.join(" OR ")));
            }
        },
        Some(Comparison::Range {
            operator,
            low,
            high,
        }) => {
            let conditions: Vec<String> = columns_for(low)
                .iter()
                .map(|column| {
                    params.push(param_for(low));
                    params.push(param_for(high));
                    if *operator == Operator::Eq {
                        format!("(e.{0} >= ? AND e.{0} <= ?)", column)
                    } else {
                        format!("(e.{0} IS NOT NULL AND NOT (e.{0} >= ? AND e.{0} <= ?))", column)
                    }
                })
                .collect();
            sql.push_str(&format!(" AND ({})", conditions.join(" OR ")));
        }
    }

    sql.push(')');
    sql
}

/// Typed columns a literal is compared against. Numeric literals cover
/// both numeric columns; SQLite compares integers and reals by value.
fn columns_for(value: &TypedValue) -> &'static [&'static str] {
    match value {
        TypedValue::String(_) => &["stringValue"],
        TypedValue::Number(_) | TypedValue::BigInt(_) => &["numberValue", "bigintValue"],
        TypedValue::Date(_) => &["dateValue"],
        TypedValue::Boolean(_) => &["booleanValue"],
    }
}

/// Bound representation of a typed value; dates bind as epoch milliseconds.
pub fn param_for(value: &TypedValue) -> SqlParam {
    match value {
        TypedValue::String(s) => SqlParam::Text(s.clone()),
        TypedValue::Number(n) => SqlParam::Real(*n),
        TypedValue::Date(d) => SqlParam::Integer(d.timestamp_millis()),
        TypedValue::BigInt(i) => SqlParam::Integer(*i),
        TypedValue::Boolean(b) => SqlParam::Bool(*b),
    }
}

/// Escapes `LIKE` wildcards for use with `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Makes a text term safe for interpolation inside a quoted LIKE pattern.
fn sanitize(text: &str) -> String {
    escape_like(text).replace('\'', "''")
}
