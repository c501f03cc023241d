use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clickhouse::Client as ClickHouseClient;
use tracing::field::Empty;
use tracing::{debug, info, Instrument, Span};

use crate::config::ClickHouseConfig;
use crate::error::{StoreFailure, WriteError};
use crate::row::StreamPlaceEventRow;
use crate::telemetry::record_span_error;

/// Destination for storage rows
///
/// Implementations insert exactly one row per `write` call and never retry;
/// retry policy belongs to the caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Insert a single row, returning how long the insert took
    async fn write(&self, row: &StreamPlaceEventRow) -> Result<Duration, WriteError>;

    /// Release the store connection. Closing twice is a no-op.
    async fn close(&self) -> Result<(), StoreFailure>;
}

/// ClickHouse writer inserting one JSONEachRow row per call
pub struct ClickHouseEventWriter {
    client: ClickHouseClient,
    table: String,
    insert_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl ClickHouseEventWriter {
    pub fn new(config: &ClickHouseConfig) -> Self {
        let client = ClickHouseClient::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_user(&config.user)
            .with_password(&config.password);

        info!(
            url = %config.url,
            database = %config.database,
            table = %config.table,
            "ClickHouse writer initialized"
        );

        Self {
            client,
            table: config.table.clone(),
            insert_timeout: config.insert_timeout,
            closed: AtomicBool::new(false),
        }
    }

    async fn insert(&self, row: &StreamPlaceEventRow) -> Result<(), StoreFailure> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreFailure::Closed);
        }

        let statement = insert_statement(&self.table, row)?;
        let execute = self.client.query(&statement).execute();

        match self.insert_timeout {
            Some(limit) => tokio::time::timeout(limit, execute)
                .await
                .map_err(|_| StoreFailure::Timeout(limit))??,
            None => execute.await?,
        }
        Ok(())
    }
}

#[async_trait]
impl EventSink for ClickHouseEventWriter {
    async fn write(&self, row: &StreamPlaceEventRow) -> Result<Duration, WriteError> {
        let span = tracing::info_span!(
            "insert_to_clickhouse",
            "event.type" = %row.event_type,
            event.at_uri = %row.at_uri,
            insert.duration_ms = Empty,
            otel.status_code = Empty,
            otel.status_message = Empty,
        );

        async {
            let start = Instant::now();
            let result = self.insert(row).await;
            let elapsed = start.elapsed();

            let span = Span::current();
            span.record("insert.duration_ms", elapsed.as_secs_f64() * 1000.0);

            match result {
                Ok(()) => {
                    debug!(at_uri = %row.at_uri, elapsed_ms = elapsed.as_millis() as u64, "row inserted");
                    Ok(elapsed)
                }
                Err(cause) => {
                    let err = WriteError::new(&self.table, row, cause);
                    record_span_error(&span, &err);
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn close(&self) -> Result<(), StoreFailure> {
        // The HTTP client holds no session; pooled sockets go with the last request
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(table = %self.table, "ClickHouse writer closed");
        }
        Ok(())
    }
}

/// Build a single-row `INSERT ... FORMAT JSONEachRow` statement
///
/// The client binds every `?` in the SQL as an argument and has no escape for
/// it. Serialized JSON only carries `?` inside string literals, so each one is
/// written as the `\u003f` escape, which JSONEachRow decodes back to `?`.
fn insert_statement(table: &str, row: &StreamPlaceEventRow) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(row)?;
    Ok(format!(
        "INSERT INTO {} FORMAT JSONEachRow\n{}",
        table,
        json.replace('?', "\\u003f")
    ))
}
