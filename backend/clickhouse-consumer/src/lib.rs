//! ClickHouse consumer
//!
//! Streams tap events from a Kafka topic into the `stream_place_events`
//! ClickHouse table, one row per event. Malformed messages and failed inserts
//! are logged and traced but never stop the stream.

pub mod config;
pub mod error;
pub mod handler;
pub mod models;
pub mod row;
pub mod service;
pub mod shutdown;
pub mod source;
mod telemetry;
pub mod writer;

pub use config::{ClickHouseConfig, ConsumerConfig, KafkaConfig};
pub use error::{ConsumerError, DecodeError, DecodeFailure, Result, StoreFailure, WriteError};
pub use handler::{HandleOutcome, MessageHandler};
pub use models::{decode, EventAction, EventKind, TapEvent};
pub use row::StreamPlaceEventRow;
pub use service::{ConsumerService, ConsumerState, ConsumerStats};
pub use source::{InboundMessage, KafkaSource, MessageSource};
pub use writer::{ClickHouseEventWriter, EventSink};
