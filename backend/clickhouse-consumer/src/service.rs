use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tracing::field::Empty;
use tracing::{error, info, warn, Instrument};

use crate::error::{ConsumerError, Result};
use crate::handler::{HandleOutcome, MessageHandler};
use crate::shutdown::shutdown_requested;
use crate::source::MessageSource;
use crate::telemetry::record_span_error;
use crate::writer::EventSink;

/// Consecutive receive errors before the log escalates to a critical alert
const CRITICAL_ERROR_THRESHOLD: u32 = 10;

/// Lifecycle of a consumer; `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Connecting,
    Subscribed,
    Running,
    Stopping,
    Stopped,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Idle => "idle",
            ConsumerState::Connecting => "connecting",
            ConsumerState::Subscribed => "subscribed",
            ConsumerState::Running => "running",
            ConsumerState::Stopping => "stopping",
            ConsumerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running totals since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub stored: u64,
    pub empty: u64,
    pub decode_failures: u64,
    pub write_failures: u64,
    pub receive_errors: u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: HandleOutcome) {
        match outcome {
            HandleOutcome::Stored => self.stored += 1,
            HandleOutcome::Empty => self.empty += 1,
            HandleOutcome::DecodeFailed => self.decode_failures += 1,
            HandleOutcome::WriteFailed => self.write_failures += 1,
        }
    }
}

/// Backoff for broker receive errors
#[derive(Debug, Default)]
pub struct ReceiveBackoff {
    consecutive: u32,
}

impl ReceiveBackoff {
    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Record an error, returning the consecutive count
    pub fn record_error(&mut self) -> u32 {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive
    }

    /// Exponential backoff: 2^(errors-1) seconds, between 1s and 60s
    pub fn delay(&self) -> Duration {
        const MIN_BACKOFF_SECS: u64 = 1;
        const MAX_BACKOFF_SECS: u64 = 60;

        if self.consecutive == 0 {
            return Duration::from_secs(MIN_BACKOFF_SECS);
        }
        let secs = 2u64
            .saturating_pow(self.consecutive - 1)
            .clamp(MIN_BACKOFF_SECS, MAX_BACKOFF_SECS);
        Duration::from_secs(secs)
    }
}

/// Consumer service
///
/// Owns the broker source and the store sink for the life of the process and
/// drives them through `Idle -> Connecting -> Subscribed -> Running ->
/// Stopping -> Stopped`. Messages are handled strictly one at a time.
pub struct ConsumerService<S, W> {
    source: S,
    handler: MessageHandler<W>,
    state: ConsumerState,
    stats: ConsumerStats,
    backoff: ReceiveBackoff,
}

impl<S: MessageSource, W: EventSink> ConsumerService<S, W> {
    pub fn new(source: S, sink: W) -> Self {
        Self {
            source,
            handler: MessageHandler::new(sink),
            state: ConsumerState::Idle,
            stats: ConsumerStats::default(),
            backoff: ReceiveBackoff::default(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn sink(&self) -> &W {
        self.handler.sink()
    }

    /// Connect to the brokers and subscribe
    ///
    /// Any failure is fatal: the consumer never reaches `Running` and the
    /// caller should [`stop`](Self::stop) it and exit.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != ConsumerState::Idle {
            return Err(ConsumerError::InvalidState {
                action: "start",
                state: self.state.as_str(),
            });
        }

        let span = tracing::info_span!(
            "clickhouse-consumer.start",
            otel.status_code = Empty,
            otel.status_message = Empty,
        );

        let result = self.connect_and_subscribe().instrument(span.clone()).await;
        if let Err(e) = &result {
            span.in_scope(|| error!(error = %e, state = %self.state, "failed to start consumer"));
            record_span_error(&span, e);
        }
        result
    }

    /// [`start`](Self::start), abandoned if shutdown is requested first
    ///
    /// Returns `Ok(false)` when shutdown won; the consumer is then stopped.
    pub async fn start_until_shutdown(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool> {
        let started = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => None,
            result = self.start() => Some(result),
        };

        match started {
            Some(result) => result.map(|()| true),
            None => {
                info!(state = %self.state, "shutdown requested during startup");
                self.stop().await;
                Ok(false)
            }
        }
    }

    async fn connect_and_subscribe(&mut self) -> Result<()> {
        self.state = ConsumerState::Connecting;
        info!("connecting to kafka...");
        self.source.connect().await?;

        info!("subscribing to topic");
        self.source.subscribe().await?;
        self.state = ConsumerState::Subscribed;
        Ok(())
    }

    /// Handle messages until shutdown is requested or the source runs dry,
    /// then stop
    ///
    /// A message whose handler is still in flight when shutdown arrives is
    /// abandoned; its offset may already be committed.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.state != ConsumerState::Subscribed {
            return Err(ConsumerError::InvalidState {
                action: "run",
                state: self.state.as_str(),
            });
        }

        self.state = ConsumerState::Running;
        info!("clickhouse-consumer running");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                received = self.source.recv() => received,
            };

            match received {
                Ok(Some(msg)) => {
                    self.backoff.record_success();
                    self.stats.received += 1;

                    let outcome = tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => {
                            warn!(
                                partition = msg.partition,
                                offset = msg.offset,
                                "shutdown requested, abandoning in-flight message"
                            );
                            break;
                        }
                        outcome = self.handler.handle(&msg) => outcome,
                    };
                    self.stats.record(outcome);
                }
                Ok(None) => {
                    info!("message source exhausted");
                    break;
                }
                Err(e) => {
                    self.stats.receive_errors += 1;
                    let consecutive = self.backoff.record_error();
                    let delay = self.backoff.delay();

                    if consecutive >= CRITICAL_ERROR_THRESHOLD {
                        error!(
                            consecutive_errors = consecutive,
                            backoff_secs = delay.as_secs(),
                            "CRITICAL: Kafka consumer experiencing persistent failures: {}",
                            e
                        );
                    } else {
                        error!(
                            consecutive_errors = consecutive,
                            backoff_secs = delay.as_secs(),
                            "Kafka consumer error (will retry with backoff): {}",
                            e
                        );
                    }

                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Disconnect from the brokers and close the store
    ///
    /// Both are attempted even if one fails. Idempotent: later calls do nothing.
    pub async fn stop(&mut self) {
        if matches!(self.state, ConsumerState::Stopping | ConsumerState::Stopped) {
            return;
        }

        info!(state = %self.state, "shutting down...");
        self.state = ConsumerState::Stopping;

        if let Err(e) = self.source.disconnect().await {
            error!(error = %e, "failed to disconnect from kafka");
        }
        if let Err(e) = self.handler.sink().close().await {
            error!(error = %e, "failed to close clickhouse connection");
        }

        self.state = ConsumerState::Stopped;
        info!(
            received = self.stats.received,
            stored = self.stats.stored,
            empty = self.stats.empty,
            decode_failures = self.stats.decode_failures,
            write_failures = self.stats.write_failures,
            receive_errors = self.stats.receive_errors,
            "shutdown complete"
        );
    }
}
