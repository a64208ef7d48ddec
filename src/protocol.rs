//! Messages exchanged between the worker pool and its units.
//!
//! Every message travels as an envelope: a 4-byte little-endian body
//! length followed by the `postcard` encoding of the message. Units never
//! share memory with the coordinator beyond these byte buffers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use aasx_index_core::models::{DocumentDescriptor, ElementRow, Endpoint};

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Reconcile the endpoint's documents against its live listing.
    Reconcile,
    /// Only check that the endpoint is reachable.
    Connectivity,
}

/// Unit of work submitted to the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTask {
    pub id: TaskId,
    pub endpoint: Endpoint,
    pub kind: TaskKind,
    pub page_size: u64,
    /// Age in milliseconds after which an unchanged document is revalidated.
    pub expiry_ms: i64,
}

impl ScanTask {
    pub fn owner(&self) -> &str {
        &self.endpoint.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    Added,
    Changed,
    Update,
    Removed,
}

/// One classified document produced by a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub kind: ResultKind,
    pub descriptor: DocumentDescriptor,
    /// Replacement element rows; `None` for removals.
    pub rows: Option<Vec<ElementRow>>,
}

/// Counters accumulated by one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatistics {
    pub added: u64,
    pub changed: u64,
    pub updated: u64,
    pub removed: u64,
    pub errors: u64,
}

impl ScanStatistics {
    pub fn record(&mut self, kind: ResultKind) {
        match kind {
            ResultKind::Added => self.added += 1,
            ResultKind::Changed => self.changed += 1,
            ResultKind::Update => self.updated += 1,
            ResultKind::Removed => self.removed += 1,
        }
    }
}

/// Coordinator to unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerRequest {
    Run(ScanTask),
}

/// Unit to coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerMessage {
    Result(ScanResult),
    /// The live listing continues at `cursor`.
    NextPage { cursor: String },
    /// Terminal message of a task.
    End {
        statistics: ScanStatistics,
        messages: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Envelope truncated: {0} bytes")]
    Truncated(usize),

    #[error("Envelope length mismatch: header says {expected}, body has {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Message too large: {0} bytes")]
    TooLarge(usize),

    #[error("Codec error: {0}")]
    Codec(#[from] postcard::Error),
}

/// Encodes `message` into a length-prefixed envelope.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let body = postcard::to_stdvec(message)?;
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::TooLarge(body.len()))?;
    let mut envelope = Vec::with_capacity(4 + body.len());
    envelope.extend_from_slice(&len.to_le_bytes());
    envelope.extend_from_slice(&body);
    Ok(envelope)
}

/// Decodes one envelope produced by [`encode`].
pub fn decode<T: DeserializeOwned>(envelope: &[u8]) -> Result<T, ProtocolError> {
    let Some((header, body)) = envelope.split_first_chunk::<4>() else {
        return Err(ProtocolError::Truncated(envelope.len()));
    };
    let expected = u32::from_le_bytes(*header) as usize;
    if expected != body.len() {
        return Err(ProtocolError::LengthMismatch {
            expected,
            actual: body.len(),
        });
    }
    Ok(postcard::from_bytes(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aasx_index_core::models::{DocumentKey, TypedValue};
    use chrono::{TimeZone, Utc};

    fn descriptor() -> DocumentDescriptor {
        DocumentDescriptor {
            endpoint: "samples".into(),
            id: "urn:example:aas:1".into(),
            id_short: "ExampleMotor".into(),
            address: "motor.aasx".into(),
            checksum: 0xDEAD_BEEF,
            timestamp: 1_700_000_000_000,
            readonly: false,
            online_ready: true,
            parent_id: None,
            asset_id: Some("urn:asset".into()),
            thumbnail: None,
        }
    }

    #[test]
    fn test_result_with_typed_rows_survives_envelope() {
        let key = DocumentKey::new("samples", "urn:example:aas:1");
        let message = WorkerMessage::Result(ScanResult {
            kind: ResultKind::Changed,
            descriptor: descriptor(),
            rows: Some(vec![
                ElementRow {
                    document: key.clone(),
                    model_type: "prop".into(),
                    id_short: "Built".into(),
                    language: None,
                    value: Some(TypedValue::Date(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())),
                },
                ElementRow {
                    document: key,
                    model_type: "mlp".into(),
                    id_short: "Name".into(),
                    language: Some("de".into()),
                    value: Some(TypedValue::String("Antrieb".into())),
                },
            ]),
        });
        let envelope = encode(&message).unwrap();
        assert_eq!(
            u32::from_le_bytes(envelope[..4].try_into().unwrap()) as usize,
            envelope.len() - 4
        );
        assert_eq!(decode::<WorkerMessage>(&envelope).unwrap(), message);
    }

    #[test]
    fn test_malformed_envelopes() {
        assert!(matches!(
            decode::<WorkerMessage>(&[1, 0]),
            Err(ProtocolError::Truncated(2))
        ));

        let mut envelope = encode(&WorkerMessage::NextPage { cursor: "c2".into() }).unwrap();
        envelope.push(0);
        assert!(matches!(
            decode::<WorkerMessage>(&envelope),
            Err(ProtocolError::LengthMismatch { .. })
        ));

        let garbage = [3, 0, 0, 0, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decode::<WorkerMessage>(&garbage),
            Err(ProtocolError::Codec(_))
        ));
    }

    #[test]
    fn test_statistics_record() {
        let mut stats = ScanStatistics::default();
        stats.record(ResultKind::Added);
        stats.record(ResultKind::Update);
        stats.record(ResultKind::Update);
        assert_eq!(stats.added, 1);
        assert_eq!(stats.updated, 2);
        assert_eq!(stats.changed, 0);
    }
}
