//! Document content: the Asset Administration Shell environment tree.
//!
//! This is the JSON serialization of an AAS environment (shells plus
//! submodels) reduced to the parts the index needs: identities, the
//! element hierarchy, and leaf values. Adapters produce it; the index
//! never stores it. [`element_rows`] flattens it into [`ElementRow`]s for
//! the structured query language.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DocumentKey, ElementRow, TypedValue};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(default)]
    pub asset_administration_shells: Vec<AssetAdministrationShell>,
    #[serde(default)]
    pub submodels: Vec<Submodel>,
}

impl Environment {
    /// The first shell of the environment; one document per environment.
    pub fn shell(&self) -> Option<&AssetAdministrationShell> {
        self.asset_administration_shells.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAdministrationShell {
    pub id: String,
    #[serde(default)]
    pub id_short: String,
    #[serde(default)]
    pub asset_information: AssetInformation,
    #[serde(default)]
    pub submodels: Vec<Reference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInformation {
    #[serde(default)]
    pub asset_kind: Option<String>,
    #[serde(default)]
    pub global_asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_thumbnail: Option<Resource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub path: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub keys: Vec<Key>,
}

impl Reference {
    /// Value of the last key, which names the referenced element.
    pub fn target(&self) -> Option<&str> {
        self.keys.last().map(|k| k.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submodel {
    pub id: String,
    #[serde(default)]
    pub id_short: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_id: Option<Reference>,
    #[serde(default)]
    pub submodel_elements: Vec<SubmodelElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LangString {
    pub language: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modelType")]
pub enum SubmodelElement {
    #[serde(rename_all = "camelCase")]
    Property {
        #[serde(default)]
        id_short: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        #[serde(default = "default_value_type")]
        value_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MultiLanguageProperty {
        #[serde(default)]
        id_short: String,
        #[serde(default)]
        value: Vec<LangString>,
    },
    #[serde(rename_all = "camelCase")]
    Range {
        #[serde(default)]
        id_short: String,
        #[serde(default = "default_value_type")]
        value_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SubmodelElementCollection {
        #[serde(default)]
        id_short: String,
        #[serde(default)]
        value: Vec<SubmodelElement>,
    },
    #[serde(rename_all = "camelCase")]
    SubmodelElementList {
        #[serde(default)]
        id_short: String,
        #[serde(default)]
        value: Vec<SubmodelElement>,
    },
    #[serde(rename_all = "camelCase")]
    File {
        #[serde(default)]
        id_short: String,
        #[serde(default)]
        content_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Blob {
        #[serde(default)]
        id_short: String,
        #[serde(default)]
        content_type: String,
    },
    #[serde(rename_all = "camelCase")]
    ReferenceElement {
        #[serde(default)]
        id_short: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Reference>,
    },
    #[serde(rename_all = "camelCase")]
    Entity {
        #[serde(default)]
        id_short: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        global_asset_id: Option<String>,
        #[serde(default)]
        statements: Vec<SubmodelElement>,
    },
    #[serde(other)]
    Other,
}

fn default_value_type() -> String {
    "xs:string".to_string()
}

impl SubmodelElement {
    /// Lowercase model-type abbreviation used by the query language.
    pub fn abbreviation(&self) -> &'static str {
        match self {
            SubmodelElement::Property { .. } => "prop",
            SubmodelElement::MultiLanguageProperty { .. } => "mlp",
            SubmodelElement::Range { .. } => "range",
            SubmodelElement::SubmodelElementCollection { .. } => "smc",
            SubmodelElement::SubmodelElementList { .. } => "sml",
            SubmodelElement::File { .. } => "file",
            SubmodelElement::Blob { .. } => "blob",
            SubmodelElement::ReferenceElement { .. } => "ref",
            SubmodelElement::Entity { .. } => "ent",
            SubmodelElement::Other => "other",
        }
    }

    pub fn id_short(&self) -> &str {
        match self {
            SubmodelElement::Property { id_short, .. }
            | SubmodelElement::MultiLanguageProperty { id_short, .. }
            | SubmodelElement::Range { id_short, .. }
            | SubmodelElement::SubmodelElementCollection { id_short, .. }
            | SubmodelElement::SubmodelElementList { id_short, .. }
            | SubmodelElement::File { id_short, .. }
            | SubmodelElement::Blob { id_short, .. }
            | SubmodelElement::ReferenceElement { id_short, .. }
            | SubmodelElement::Entity { id_short, .. } => id_short,
            SubmodelElement::Other => "",
        }
    }

    /// Child elements of containers; empty for leaves.
    pub fn children(&self) -> &[SubmodelElement] {
        match self {
            SubmodelElement::SubmodelElementCollection { value, .. }
            | SubmodelElement::SubmodelElementList { value, .. } => value,
            SubmodelElement::Entity { statements, .. } => statements,
            _ => &[],
        }
    }
}

/// Submodel abbreviation for rows describing a submodel itself.
pub const SUBMODEL_ABBREVIATION: &str = "sm";

/// Flattens the environment into queryable element rows.
pub fn element_rows(key: &DocumentKey, env: &Environment) -> Vec<ElementRow> {
    let mut rows = Vec::new();
    for submodel in &env.submodels {
        rows.push(ElementRow {
            document: key.clone(),
            model_type: SUBMODEL_ABBREVIATION.to_string(),
            id_short: submodel.id_short.clone(),
            language: None,
            value: None,
        });
        for element in &submodel.submodel_elements {
            push_rows(key, element, &mut rows);
        }
    }
    rows
}

fn push_rows(key: &DocumentKey, element: &SubmodelElement, rows: &mut Vec<ElementRow>) {
    let row = |value: Option<TypedValue>, language: Option<String>| ElementRow {
        document: key.clone(),
        model_type: element.abbreviation().to_string(),
        id_short: element.id_short().to_string(),
        language,
        value,
    };

    match element {
        SubmodelElement::Property {
            value_type, value, ..
        } => rows.push(row(value.as_deref().map(|v| typed_value(value_type, v)), None)),
        SubmodelElement::MultiLanguageProperty { value, .. } => {
            if value.is_empty() {
                rows.push(row(None, None));
            }
            for text in value {
                rows.push(row(
                    Some(TypedValue::String(text.text.clone())),
                    Some(text.language.clone()),
                ));
            }
        }
        SubmodelElement::File { value, .. } => {
            rows.push(row(value.clone().map(TypedValue::String), None))
        }
        SubmodelElement::Entity {
            global_asset_id, ..
        } => rows.push(row(global_asset_id.clone().map(TypedValue::String), None)),
        SubmodelElement::Other => {}
        _ => rows.push(row(None, None)),
    }

    for child in element.children() {
        push_rows(key, child, rows);
    }
}

/// Converts a raw XSD-typed string into a [`TypedValue`].
///
/// Values that fail to parse as their declared type are kept as strings.
pub fn typed_value(value_type: &str, raw: &str) -> TypedValue {
    let local = value_type.rsplit(':').next().unwrap_or(value_type);
    let raw_trimmed = raw.trim();
    let parsed = match local {
        "boolean" => match raw_trimmed {
            "true" | "1" => Some(TypedValue::Boolean(true)),
            "false" | "0" => Some(TypedValue::Boolean(false)),
            _ => None,
        },
        "long" | "integer" | "unsignedLong" | "nonNegativeInteger" | "positiveInteger"
        | "negativeInteger" | "nonPositiveInteger" => {
            raw_trimmed.parse::<i64>().ok().map(TypedValue::BigInt)
        }
        "int" | "short" | "byte" | "unsignedInt" | "unsignedShort" | "unsignedByte"
        | "double" | "float" | "decimal" => raw_trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(TypedValue::Number),
        "date" | "dateTime" => parse_date(raw_trimmed).map(TypedValue::Date),
        _ => None,
    };
    parsed.unwrap_or_else(|| TypedValue::String(raw.to_string()))
}

/// Parses an RFC 3339 date-time or a plain `YYYY-MM-DD` date (midnight UTC).
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValueKind;

    const SAMPLE: &str = r#"{
        "assetAdministrationShells": [{
            "modelType": "AssetAdministrationShell",
            "id": "urn:example:aas:motor",
            "idShort": "ExampleMotor",
            "assetInformation": { "assetKind": "Instance", "globalAssetId": "urn:example:asset:motor" },
            "submodels": [{ "type": "ModelReference", "keys": [{ "type": "Submodel", "value": "urn:example:sm:tech" }] }]
        }],
        "submodels": [{
            "modelType": "Submodel",
            "id": "urn:example:sm:tech",
            "idShort": "TechnicalData",
            "submodelElements": [
                { "modelType": "Property", "idShort": "MaxRotationSpeed", "valueType": "xs:int", "value": "5000", "category": "PARAMETER" },
                { "modelType": "MultiLanguageProperty", "idShort": "Designation",
                  "value": [{ "language": "en", "text": "Motor" }, { "language": "de", "text": "Motor DE" }] },
                { "modelType": "SubmodelElementCollection", "idShort": "Dates",
                  "value": [{ "modelType": "Property", "idShort": "Built", "valueType": "xs:date", "value": "2020-05-01" }] },
                { "modelType": "Capability", "idShort": "Unknown" }
            ]
        }]
    }"#;

    #[test]
    fn test_parse_sample_environment() {
        let env: Environment = serde_json::from_str(SAMPLE).unwrap();
        let shell = env.shell().unwrap();
        assert_eq!(shell.id_short, "ExampleMotor");
        assert_eq!(shell.submodels[0].target(), Some("urn:example:sm:tech"));
        assert_eq!(env.submodels[0].submodel_elements.len(), 4);
        assert_eq!(env.submodels[0].submodel_elements[3], SubmodelElement::Other);
    }

    #[test]
    fn test_element_rows_flatten_nested() {
        let env: Environment = serde_json::from_str(SAMPLE).unwrap();
        let key = DocumentKey::new("samples", "urn:example:aas:motor");
        let rows = element_rows(&key, &env);

        let kinds: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.model_type.as_str(), r.id_short.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("sm", "TechnicalData"),
                ("prop", "MaxRotationSpeed"),
                ("mlp", "Designation"),
                ("mlp", "Designation"),
                ("smc", "Dates"),
                ("prop", "Built"),
            ]
        );
        assert_eq!(rows[1].value, Some(TypedValue::Number(5000.0)));
        assert_eq!(rows[3].language.as_deref(), Some("de"));
        assert_eq!(rows[5].value.as_ref().map(|v| v.kind()), Some(ValueKind::Date));
        assert!(rows.iter().all(|r| r.document == key));
    }

    #[test]
    fn test_typed_value_kinds() {
        assert_eq!(typed_value("xs:boolean", "true"), TypedValue::Boolean(true));
        assert_eq!(typed_value("xs:long", "42"), TypedValue::BigInt(42));
        assert_eq!(typed_value("xs:double", "1.5"), TypedValue::Number(1.5));
        assert_eq!(
            typed_value("xs:string", "hello"),
            TypedValue::String("hello".into())
        );
        assert_eq!(
            typed_value("xs:int", "not-a-number"),
            TypedValue::String("not-a-number".into())
        );
        assert!(matches!(
            typed_value("xs:dateTime", "2024-01-02T03:04:05Z"),
            TypedValue::Date(_)
        ));
    }
}
