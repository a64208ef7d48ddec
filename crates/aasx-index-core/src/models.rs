//! Core data models shared by the index backends, the reconciliation
//! scanner, and the worker protocol.
//!
//! A [`DocumentDescriptor`] is what the index stores about an Asset
//! Administration Shell: identity, location, and a checksum of its
//! content. The content itself (see [`crate::content`]) is fetched on
//! demand from the owning endpoint and never stored in the index.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::content::Environment;

/// Natural key of a document: `(endpoint, id)`.
///
/// Ordering is lexicographic by endpoint, then id, compared byte-wise.
/// Both index backends rely on this ordering for keyset pagination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    pub endpoint: String,
    pub id: String,
}

impl DocumentKey {
    pub fn new(endpoint: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            id: id.into(),
        }
    }

    /// Encodes the key as an opaque, URL-safe cursor token.
    pub fn to_token(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}\n{}", self.endpoint, self.id))
    }

    /// Decodes a token produced by [`DocumentKey::to_token`].
    pub fn from_token(token: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token.trim()).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        let (endpoint, id) = text.split_once('\n')?;
        Some(Self::new(endpoint, id))
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.endpoint, self.id)
    }
}

/// Index entry for one Asset Administration Shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDescriptor {
    pub endpoint: String,
    pub id: String,
    pub id_short: String,
    /// Adapter-level handle used to fetch the content again (file path,
    /// encoded shell id, node id, descriptor href).
    pub address: String,
    pub checksum: u32,
    /// Epoch milliseconds of the last validation against the live source.
    pub timestamp: i64,
    pub readonly: bool,
    pub online_ready: bool,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl DocumentDescriptor {
    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(self.endpoint.clone(), self.id.clone())
    }
}

/// A descriptor together with the content it was computed from.
#[derive(Debug, Clone)]
pub struct LiveDocument {
    pub descriptor: DocumentDescriptor,
    pub content: Option<Environment>,
}

/// Typed value of an [`ElementRow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    String(String),
    Number(f64),
    Date(DateTime<Utc>),
    BigInt(i64),
    Boolean(bool),
}

/// Value kind tag, used by the query compiler to pick a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Number,
    Date,
    BigInt,
    Boolean,
}

impl TypedValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            TypedValue::String(_) => ValueKind::String,
            TypedValue::Number(_) => ValueKind::Number,
            TypedValue::Date(_) => ValueKind::Date,
            TypedValue::BigInt(_) => ValueKind::BigInt,
            TypedValue::Boolean(_) => ValueKind::Boolean,
        }
    }
}

/// Flattened, queryable element of a document's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRow {
    pub document: DocumentKey,
    /// Lowercase model-type abbreviation (`prop`, `mlp`, `smc`, ...).
    pub model_type: String,
    pub id_short: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub value: Option<TypedValue>,
}

/// A named, typed external resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    /// Protocol string (`directory`, `package-server`, `opcua`, `registry`).
    /// Parsed by the adapter factory; unknown values fail there.
    pub protocol: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Keyset pagination request.
///
/// `previous` walks forward: items strictly after that key. `next` walks
/// backward: items strictly before that key, still returned ascending.
/// With neither, the first page is returned. With both, `previous` wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub previous: Option<DocumentKey>,
    pub next: Option<DocumentKey>,
    pub limit: usize,
}

impl Cursor {
    pub fn first(limit: usize) -> Self {
        Self {
            previous: None,
            next: None,
            limit: limit.max(1),
        }
    }

    pub fn after(key: DocumentKey, limit: usize) -> Self {
        Self {
            previous: Some(key),
            next: None,
            limit: limit.max(1),
        }
    }

    pub fn before(key: DocumentKey, limit: usize) -> Self {
        Self {
            previous: None,
            next: Some(key),
            limit: limit.max(1),
        }
    }

    pub fn direction(&self) -> Direction {
        match (&self.previous, &self.next) {
            (Some(key), _) => Direction::Forward(Some(key)),
            (None, Some(key)) => Direction::Backward(key),
            (None, None) => Direction::Forward(None),
        }
    }
}

/// Resolved walking direction of a [`Cursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction<'a> {
    Forward(Option<&'a DocumentKey>),
    Backward(&'a DocumentKey),
}

/// One page of results.
///
/// `previous` is the key of the first item when more items exist before
/// it; `next` is the key of the last item when more items exist after it.
/// `None` means there is nothing further in that direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub previous: Option<DocumentKey>,
    pub next: Option<DocumentKey>,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            previous: None,
            next: None,
            items: Vec::new(),
        }
    }
}

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_endpoint_first() {
        let a = DocumentKey::new("a", "z");
        let b = DocumentKey::new("b", "a");
        assert!(a < b);
        assert!(DocumentKey::new("a", "x") < DocumentKey::new("a", "y"));
    }

    #[test]
    fn test_token_roundtrip_with_colons() {
        let key = DocumentKey::new("samples", "urn:example:aas:1");
        let token = key.to_token();
        assert!(!token.contains('='));
        assert_eq!(DocumentKey::from_token(&token), Some(key));
    }

    #[test]
    fn test_invalid_token() {
        assert_eq!(DocumentKey::from_token("!!!"), None);
        let no_separator = URL_SAFE_NO_PAD.encode("noseparator");
        assert_eq!(DocumentKey::from_token(&no_separator), None);
    }

    #[test]
    fn test_cursor_direction() {
        let k = DocumentKey::new("e", "1");
        assert_eq!(Cursor::first(5).direction(), Direction::Forward(None));
        assert_eq!(
            Cursor::after(k.clone(), 5).direction(),
            Direction::Forward(Some(&k))
        );
        assert_eq!(Cursor::before(k.clone(), 5).direction(), Direction::Backward(&k));
        assert_eq!(Cursor::first(0).limit, 1);
    }
}
