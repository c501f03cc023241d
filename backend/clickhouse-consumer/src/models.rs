use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DecodeError, DecodeFailure};

/// Whether a tap event concerns a record or an identity/account change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Record,
    Identity,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Record => "record",
            EventKind::Identity => "identity",
        }
    }
}

/// Record-level operation, present only on record events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Create => "create",
            EventAction::Update => "update",
            EventAction::Delete => "delete",
        }
    }
}

/// Tap event message structure
///
/// Expected format from the tap:
/// ```json
/// {
///   "type": "record",
///   "did": "did:plc:abc",
///   "atUri": "at://did:plc:abc/app.foo/xyz",
///   "timestamp": 1700000000000,
///   "createdAt": "2023-11-14T22:13:20.000Z",
///   "action": "create",
///   "isBackfill": false,
///   "collection": "app.foo",
///   "rkey": "xyz",
///   "recordData": { "text": "hello" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TapEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// DID of the originating actor
    #[serde(default)]
    pub did: String,

    /// AT URI of the affected resource
    pub at_uri: String,

    /// Ingestion time assigned by the tap (milliseconds since epoch)
    #[serde(default)]
    pub timestamp: i64,

    /// Original creation time of the record (ISO-8601), when known
    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub action: Option<EventAction>,

    #[serde(default)]
    pub is_backfill: bool,

    #[serde(default)]
    pub collection: Option<String>,

    #[serde(default)]
    pub rkey: Option<String>,

    /// Record content, shape unconstrained
    #[serde(default)]
    pub record_data: Option<Map<String, Value>>,
}

impl TapEvent {
    /// Validate tap event
    pub fn validate(&self) -> Result<(), DecodeFailure> {
        if self.at_uri.trim().is_empty() {
            return Err(DecodeFailure::Validation("atUri is empty".to_string()));
        }
        Ok(())
    }
}

/// Decode a raw Kafka payload into a tap event
///
/// # Returns
/// * `Ok(Some(event))` - Payload is a valid tap event
/// * `Ok(None)` - Payload is absent or empty, nothing to store
/// * `Err(e)` - Payload is malformed or misses a required field
pub fn decode(raw: Option<&[u8]>) -> Result<Option<TapEvent>, DecodeError> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };

    let event: TapEvent = serde_json::from_slice(raw).map_err(|e| DecodeError::new(raw, e))?;
    event.validate().map_err(|e| DecodeError::new(raw, e))?;

    Ok(Some(event))
}
