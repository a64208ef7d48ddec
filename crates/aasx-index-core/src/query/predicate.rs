//! In-memory evaluation of filter expressions.

use std::cmp::Ordering;

use tracing::warn;

use crate::models::{DocumentDescriptor, ElementRow, TypedValue};

use super::{parse, Comparison, ElementPredicate, Expression, Operator};

/// A compiled filter, evaluated against a descriptor and its element rows.
#[derive(Debug, Clone)]
pub struct Predicate {
    /// `None` after a parse failure: matches nothing.
    expression: Option<Expression>,
    language: Option<String>,
}

impl Predicate {
    /// Compiles `filter`. A malformed filter is logged and yields a
    /// predicate that never matches.
    pub fn compile(filter: &str, language: Option<&str>) -> Self {
        let expression = match parse(filter) {
            Ok(expr) => Some(expr),
            Err(e) => {
                warn!(filter, error = %e, "ignoring malformed filter");
                None
            }
        };
        Self {
            expression,
            language: language.map(str::to_string),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.expression.is_some()
    }

    pub fn matches(&self, document: &DocumentDescriptor, rows: &[ElementRow]) -> bool {
        match &self.expression {
            Some(expr) => self.eval(expr, document, rows),
            None => false,
        }
    }

    fn eval(&self, expr: &Expression, document: &DocumentDescriptor, rows: &[ElementRow]) -> bool {
        match expr {
            Expression::Or(terms) => terms.iter().any(|t| self.eval(t, document, rows)),
            Expression::And(terms) => terms.iter().all(|t| self.eval(t, document, rows)),
            Expression::Text(text) => {
                let needle = text.to_ascii_lowercase();
                [&document.endpoint, &document.id, &document.id_short]
                    .iter()
                    .any(|field| field.to_ascii_lowercase().contains(&needle))
            }
            Expression::Element(predicate) => rows.iter().any(|row| self.row_matches(predicate, row)),
        }
    }

    fn row_matches(&self, predicate: &ElementPredicate, row: &ElementRow) -> bool {
        if row.model_type != predicate.model_type {
            return false;
        }
        if let Some(pattern) = &predicate.id_short {
            if !row
                .id_short
                .to_ascii_lowercase()
                .contains(&pattern.to_ascii_lowercase())
            {
                return false;
            }
        }
        if let (Some(wanted), Some(actual)) = (&self.language, &row.language) {
            if wanted != actual {
                return false;
            }
        }
        match &predicate.comparison {
            None => true,
            Some(comparison) => match &row.value {
                Some(value) => comparison_holds(comparison, value),
                None => false,
            },
        }
    }
}

fn comparison_holds(comparison: &Comparison, value: &TypedValue) -> bool {
    match comparison {
        Comparison::Value(operator, literal) => {
            if !comparable(value, literal) {
                return false;
            }
            if let (TypedValue::String(v), TypedValue::String(l)) = (value, literal) {
                if operator.is_equality() {
                    return v.eq_ignore_ascii_case(l) == (*operator == Operator::Eq);
                }
            }
            order(value, literal).is_some_and(|o| operator.holds(o))
        }
        Comparison::Range {
            operator,
            low,
            high,
        } => {
            if !comparable(value, low) {
                return false;
            }
            let inside = order(value, low).is_some_and(|o| o != Ordering::Less)
                && order(value, high).is_some_and(|o| o != Ordering::Greater);
            inside == (*operator == Operator::Eq)
        }
    }
}

fn is_numeric(value: &TypedValue) -> bool {
    matches!(value, TypedValue::Number(_) | TypedValue::BigInt(_))
}

/// Same kind, or both numeric: `5` matches an `xs:integer` value.
fn comparable(a: &TypedValue, b: &TypedValue) -> bool {
    a.kind() == b.kind() || (is_numeric(a) && is_numeric(b))
}

/// Type-appropriate ordering of two values of the same kind. Numbers and
/// big integers compare numerically.
fn order(a: &TypedValue, b: &TypedValue) -> Option<Ordering> {
    match (a, b) {
        (TypedValue::Number(a), TypedValue::BigInt(b)) => a.partial_cmp(&(*b as f64)),
        (TypedValue::BigInt(a), TypedValue::Number(b)) => (*a as f64).partial_cmp(b),
        (TypedValue::String(a), TypedValue::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (TypedValue::Number(a), TypedValue::Number(b)) => a.partial_cmp(b),
        (TypedValue::Date(a), TypedValue::Date(b)) => {
            Some(a.timestamp_millis().cmp(&b.timestamp_millis()))
        }
        (TypedValue::BigInt(a), TypedValue::BigInt(b)) => Some(a.cmp(b)),
        (TypedValue::Boolean(a), TypedValue::Boolean(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentKey;

    fn motor() -> DocumentDescriptor {
        DocumentDescriptor {
            endpoint: "samples".into(),
            id: "urn:example:aas:1".into(),
            id_short: "ExampleMotor".into(),
            address: "motor.aasx".into(),
            checksum: 0,
            timestamp: 0,
            readonly: false,
            online_ready: false,
            parent_id: None,
            asset_id: None,
            thumbnail: None,
        }
    }

    fn row(model_type: &str, id_short: &str, value: Option<TypedValue>) -> ElementRow {
        ElementRow {
            document: DocumentKey::new("samples", "urn:example:aas:1"),
            model_type: model_type.into(),
            id_short: id_short.into(),
            language: None,
            value,
        }
    }

    fn check(filter: &str, rows: &[ElementRow]) -> bool {
        Predicate::compile(filter, None).matches(&motor(), rows)
    }

    #[test]
    fn test_text_scenarios() {
        assert!(check("motor", &[]));
        assert!(!check("unknown", &[]));
        assert!(check("unknown || motor", &[]));
        assert!(!check("unknown && motor", &[]));
        assert!(check("SAMPLES", &[]));
        assert!(check("aas:1", &[]));
    }

    #[test]
    fn test_structured_number_scenarios() {
        let rows = vec![row(
            "prop",
            "MaxRotationSpeed",
            Some(TypedValue::Number(5000.0)),
        )];
        assert!(check("#prop:MaxRotationSpeed = 4999...5001", &rows));
        assert!(!check("#prop:MaxRotationSpeed > 5000", &rows));
        assert!(check("#prop:MaxRotationSpeed >= 5000", &rows));
        assert!(check("#prop:rotation", &rows));
        assert!(!check("#prop:MaxRotationSpeed != 4999...5001", &rows));
        assert!(!check("#mlp:MaxRotationSpeed", &rows));
        assert!(check("#prop:MaxRotationSpeed = 5000n", &rows));
    }

    #[test]
    fn test_numbers_and_big_integers_compare_numerically() {
        let rows = vec![row("prop", "Count", Some(TypedValue::BigInt(12)))];
        assert!(check("#prop:Count > 5", &rows));
        assert!(check("#prop:Count = 12", &rows));
        assert!(check("#prop:Count = 11.5...12.5", &rows));
        assert!(!check("#prop:Count < 12", &rows));
        assert!(!check("#prop:Count = twelve", &rows));
    }

    #[test]
    fn test_string_and_boolean_comparisons() {
        let rows = vec![
            row("prop", "Vendor", Some(TypedValue::String("ACME".into()))),
            row("prop", "Enabled", Some(TypedValue::Boolean(true))),
        ];
        assert!(check("#prop:Vendor = acme", &rows));
        assert!(!check("#prop:Vendor != acme", &rows));
        assert!(check("#prop:Vendor < B", &rows));
        assert!(check("#prop:Enabled = true", &rows));
        assert!(check("#prop:Enabled != false", &rows));
        assert!(!check("#prop:Enabled = false", &rows));
    }

    #[test]
    fn test_language_restricts_tagged_rows() {
        let mut en = row("mlp", "Designation", Some(TypedValue::String("Motor".into())));
        en.language = Some("en".into());
        let mut de = row("mlp", "Designation", Some(TypedValue::String("Antrieb".into())));
        de.language = Some("de".into());
        let rows = vec![en, de];

        let p = Predicate::compile("#mlp:Designation = Antrieb", Some("de"));
        assert!(p.matches(&motor(), &rows));
        let p = Predicate::compile("#mlp:Designation = Antrieb", Some("en"));
        assert!(!p.matches(&motor(), &rows));
        let p = Predicate::compile("#mlp:Designation = Antrieb", None);
        assert!(p.matches(&motor(), &rows));
    }

    #[test]
    fn test_malformed_filter_matches_nothing() {
        let p = Predicate::compile("motor &&", None);
        assert!(!p.is_valid());
        assert!(!p.matches(&motor(), &[]));
    }
}
