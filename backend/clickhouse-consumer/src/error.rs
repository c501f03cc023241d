use std::time::Duration;

use thiserror::Error;

use crate::row::StreamPlaceEventRow;

pub type Result<T> = std::result::Result<T, ConsumerError>;

/// Errors that escape the consumer: startup and configuration failures
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Kafka error: {0}")]
    Kafka(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },
}

impl From<rdkafka::error::KafkaError> for ConsumerError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        ConsumerError::Kafka(err.to_string())
    }
}

/// Why a payload could not be turned into a [`TapEvent`](crate::models::TapEvent)
#[derive(Debug, Error)]
pub enum DecodeFailure {
    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid event: {0}")]
    Validation(String),
}

/// A payload rejected by the decoder, kept for diagnosis
#[derive(Debug, Error)]
#[error("failed to decode message: {cause}")]
pub struct DecodeError {
    /// Raw payload, lossily decoded as UTF-8
    pub raw: String,
    #[source]
    pub cause: DecodeFailure,
}

impl DecodeError {
    pub fn new(raw: &[u8], cause: impl Into<DecodeFailure>) -> Self {
        Self {
            raw: String::from_utf8_lossy(raw).into_owned(),
            cause: cause.into(),
        }
    }
}

/// Why a single-row insert did not land
#[derive(Debug, Error)]
pub enum StoreFailure {
    #[error("row serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ClickHouse rejected insert: {0}")]
    ClickHouse(#[from] clickhouse::error::Error),

    #[error("insert timed out after {0:?}")]
    Timeout(Duration),

    #[error("store connection is closed")]
    Closed,
}

/// A failed insert, carrying the row that was not stored
#[derive(Debug, Error)]
#[error("failed to insert {} into {table}: {cause}", .row.at_uri)]
pub struct WriteError {
    pub table: String,
    pub row: Box<StreamPlaceEventRow>,
    #[source]
    pub cause: StoreFailure,
}

impl WriteError {
    pub fn new(table: &str, row: &StreamPlaceEventRow, cause: impl Into<StoreFailure>) -> Self {
        Self {
            table: table.to_string(),
            row: Box::new(row.clone()),
            cause: cause.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_keeps_raw_payload() {
        let err = DecodeError::new(
            b"{not json",
            DecodeFailure::Validation("atUri is empty".to_string()),
        );
        assert_eq!(err.raw, "{not json");
        assert_eq!(
            err.to_string(),
            "failed to decode message: invalid event: atUri is empty"
        );
    }

    #[test]
    fn test_invalid_state_message() {
        let err = ConsumerError::InvalidState {
            action: "start",
            state: "stopped",
        };
        assert_eq!(err.to_string(), "Invalid state: cannot start while stopped");
    }
}
