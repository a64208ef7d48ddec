//! Recursive-descent parser for the filter language.
//!
//! Type checks that both compilation targets must agree on (boolean
//! operators, range operands) are done here, so a filter is either valid
//! for both targets or for neither.

use crate::content::parse_date;
use crate::error::QueryError;
use crate::models::{TypedValue, ValueKind};

use super::{Comparison, ElementPredicate, Expression, Operator};

/// Parses a filter expression.
pub fn parse(input: &str) -> Result<Expression, QueryError> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let expr = parser.parse_or()?;
    parser.skip_whitespace();
    if let Some(c) = parser.peek() {
        return Err(QueryError::new(
            parser.pos,
            format!("unexpected '{}'", c),
        ));
    }
    Ok(expr)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn starts_with(&self, token: &str) -> bool {
        let mut i = self.pos;
        for c in token.chars() {
            if self.chars.get(i) != Some(&c) {
                return false;
            }
            i += 1;
        }
        true
    }

    fn consume(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.starts_with(token) {
            self.pos += token.chars().count();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    /// True at characters that end a bare word or value.
    fn at_boundary(&self) -> bool {
        match self.peek() {
            None => true,
            Some(c) if c.is_whitespace() || c == '(' || c == ')' => true,
            _ => self.starts_with("&&") || self.starts_with("||"),
        }
    }

    fn parse_or(&mut self) -> Result<Expression, QueryError> {
        let mut terms = vec![self.parse_and()?];
        while self.consume("||") {
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expression::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expression, QueryError> {
        let mut terms = vec![self.parse_term()?];
        while self.consume("&&") {
            terms.push(self.parse_term()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expression::And(terms)
        })
    }

    fn parse_term(&mut self) -> Result<Expression, QueryError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(QueryError::new(self.pos, "expected a term")),
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if !self.consume(")") {
                    return Err(QueryError::new(self.pos, "expected ')'"));
                }
                Ok(inner)
            }
            Some('#') => self.parse_element().map(Expression::Element),
            Some('"') | Some('\'') => Ok(Expression::Text(self.parse_quoted()?)),
            Some(_) => self.parse_words(),
        }
    }

    fn parse_words(&mut self) -> Result<Expression, QueryError> {
        let start = self.pos;
        let mut words: Vec<String> = Vec::new();
        loop {
            self.skip_whitespace();
            if self.at_boundary() || matches!(self.peek(), Some('#' | '"' | '\'')) {
                break;
            }
            let mut word = String::new();
            while !self.at_boundary() {
                word.push(self.chars[self.pos]);
                self.pos += 1;
            }
            words.push(word);
        }
        if words.is_empty() {
            let found = self.peek().map(String::from).unwrap_or_default();
            return Err(QueryError::new(start, format!("unexpected '{}'", found)));
        }
        Ok(Expression::Text(words.join(" ")))
    }

    fn parse_quoted(&mut self) -> Result<String, QueryError> {
        let start = self.pos;
        let quote = self.chars[self.pos];
        self.pos += 1;
        let mut text = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    if let Some(escaped) = self.peek() {
                        text.push(escaped);
                        self.pos += 1;
                    }
                }
                c if c == quote => return Ok(text),
                c => text.push(c),
            }
        }
        Err(QueryError::new(start, "unterminated string"))
    }

    fn parse_element(&mut self) -> Result<ElementPredicate, QueryError> {
        self.pos += 1; // '#'
        let start = self.pos;
        let mut model_type = String::new();
        while let Some(c) = self.peek().filter(|c| c.is_ascii_alphanumeric()) {
            model_type.push(c.to_ascii_lowercase());
            self.pos += 1;
        }
        if model_type.is_empty() {
            return Err(QueryError::new(start, "expected a model type after '#'"));
        }

        let mut id_short = None;
        if self.peek() == Some(':') {
            self.pos += 1;
            let mut pattern = String::new();
            while !self.at_boundary() && !matches!(self.peek(), Some('=' | '!' | '<' | '>')) {
                pattern.push(self.chars[self.pos]);
                self.pos += 1;
            }
            if !pattern.is_empty() {
                id_short = Some(pattern);
            }
        }

        let checkpoint = self.pos;
        self.skip_whitespace();
        let Some(operator) = self.parse_operator() else {
            self.pos = checkpoint;
            return Ok(ElementPredicate {
                model_type,
                id_short,
                comparison: None,
            });
        };

        self.skip_whitespace();
        let value_start = self.pos;
        let comparison = if matches!(self.peek(), Some('"' | '\'')) {
            Comparison::Value(operator, TypedValue::String(self.parse_quoted()?))
        } else {
            let mut raw = String::new();
            while !self.at_boundary() {
                raw.push(self.chars[self.pos]);
                self.pos += 1;
            }
            if raw.is_empty() {
                return Err(QueryError::new(value_start, "expected a value"));
            }
            comparison_from_raw(operator, &raw, value_start)?
        };

        Ok(ElementPredicate {
            model_type,
            id_short,
            comparison: Some(comparison),
        })
    }

    fn parse_operator(&mut self) -> Option<Operator> {
        let candidates = [
            ("!=", Operator::Ne),
            ("<=", Operator::Le),
            (">=", Operator::Ge),
            ("==", Operator::Eq),
            ("=", Operator::Eq),
            ("<", Operator::Lt),
            (">", Operator::Gt),
        ];
        for (token, operator) in candidates {
            if self.starts_with(token) {
                self.pos += token.len();
                return Some(operator);
            }
        }
        None
    }
}

fn comparison_from_raw(
    operator: Operator,
    raw: &str,
    position: usize,
) -> Result<Comparison, QueryError> {
    if let Some((low, high)) = raw.split_once("...") {
        let (low, high) = (infer_literal(low), infer_literal(high));
        if low.kind() != high.kind() {
            return Err(QueryError::new(position, "range bounds differ in type"));
        }
        if low.kind() == ValueKind::Boolean {
            return Err(QueryError::new(position, "boolean values have no range"));
        }
        if !operator.is_equality() {
            return Err(QueryError::new(position, "ranges support only '=' and '!='"));
        }
        return Ok(Comparison::Range {
            operator,
            low,
            high,
        });
    }

    let value = infer_literal(raw);
    if value.kind() == ValueKind::Boolean && !operator.is_equality() {
        return Err(QueryError::new(
            position,
            "boolean values support only '=' and '!='",
        ));
    }
    Ok(Comparison::Value(operator, value))
}

/// Infers the type of an unquoted literal from its syntax.
pub fn infer_literal(raw: &str) -> TypedValue {
    match raw {
        "true" => return TypedValue::Boolean(true),
        "false" => return TypedValue::Boolean(false),
        _ => {}
    }
    if let Some(digits) = raw.strip_suffix('n') {
        let unsigned = digits.strip_prefix('-').unwrap_or(digits);
        if !unsigned.is_empty() && unsigned.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(v) = digits.parse::<i64>() {
                return TypedValue::BigInt(v);
            }
        }
    }
    if let Ok(v) = raw.parse::<f64>() {
        if v.is_finite() {
            return TypedValue::Number(v);
        }
    }
    if let Some(date) = parse_date(raw) {
        return TypedValue::Date(date);
    }
    TypedValue::String(raw.to_string())
}
