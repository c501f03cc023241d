use opentelemetry_config::link_remote_parent;
use tracing::field::Empty;
use tracing::{error, info, warn, Instrument, Span};

use crate::models::decode;
use crate::row::StreamPlaceEventRow;
use crate::source::InboundMessage;
use crate::telemetry::record_span_error;
use crate::writer::EventSink;

/// What became of a single delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Row inserted
    Stored,
    /// Empty payload, nothing to insert
    Empty,
    /// Payload rejected by the decoder
    DecodeFailed,
    /// Insert failed; the row is not stored
    WriteFailed,
}

/// Runs decode -> map -> write for one message at a time
///
/// Failures are logged, recorded on the message span and reported as a
/// [`HandleOutcome`]; nothing is propagated, so one bad message never stops
/// the consumer.
pub struct MessageHandler<W> {
    sink: W,
}

impl<W: EventSink> MessageHandler<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub async fn handle(&self, msg: &InboundMessage) -> HandleOutcome {
        let span = tracing::info_span!(
            "handle_message",
            kafka.topic = %msg.topic,
            kafka.partition = msg.partition,
            kafka.offset = msg.offset,
            "event.type" = Empty,
            event.at_uri = Empty,
            otel.status_code = Empty,
            otel.status_message = Empty,
        );
        link_remote_parent(&span, &msg.headers);

        self.process(msg).instrument(span).await
    }

    async fn process(&self, msg: &InboundMessage) -> HandleOutcome {
        let span = Span::current();

        let event = match decode(msg.payload.as_deref()) {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!(offset = msg.offset, "received empty message");
                return HandleOutcome::Empty;
            }
            Err(e) => {
                error!(
                    error = %e,
                    raw = %e.raw,
                    partition = msg.partition,
                    offset = msg.offset,
                    "failed to process message"
                );
                record_span_error(&span, &e);
                return HandleOutcome::DecodeFailed;
            }
        };

        span.record("event.type", event.kind.as_str());
        span.record("event.at_uri", event.at_uri.as_str());

        let row = StreamPlaceEventRow::from_event(&event);

        match self.sink.write(&row).await {
            Ok(elapsed) => {
                info!(
                    event_type = event.kind.as_str(),
                    at_uri = %event.at_uri,
                    collection = event.collection.as_deref().unwrap_or_default(),
                    is_backfill = event.is_backfill,
                    insert_ms = elapsed.as_millis() as u64,
                    "stored event"
                );
                HandleOutcome::Stored
            }
            Err(e) => {
                error!(
                    error = %e,
                    row = ?e.row,
                    partition = msg.partition,
                    offset = msg.offset,
                    "failed to insert to clickhouse"
                );
                record_span_error(&span, &e);
                HandleOutcome::WriteFailed
            }
        }
    }
}
