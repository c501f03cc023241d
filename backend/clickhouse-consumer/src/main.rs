//! ClickHouse consumer - Kafka to ClickHouse ingestion for tap events
//!
//! Environment variables:
//! - KAFKA_BROKERS: Comma-separated broker addresses (default: "localhost:19092")
//! - KAFKA_TOPIC: Topic to consume (default: "stream-place-events")
//! - KAFKA_GROUP_ID: Consumer group ID (default: "clickhouse-consumer")
//! - KAFKA_CLIENT_ID: Client ID reported to the brokers (default: "clickhouse-consumer")
//! - CLICKHOUSE_URL: ClickHouse HTTP endpoint (default: "http://localhost:8123")
//! - CLICKHOUSE_DATABASE: Target database (default: "sp_stats")
//! - CLICKHOUSE_USER / CLICKHOUSE_PASSWORD: Credentials (default: "default" / "")
//! - CLICKHOUSE_TABLE: Target table (default: "stream_place_events")
//! - CLICKHOUSE_INSERT_TIMEOUT_MS: Per-insert timeout (default: none)
//! - OTEL_EXPORTER_OTLP_ENDPOINT: OTLP traces endpoint (default: "http://localhost:4318/v1/traces")
//! - OTEL_SERVICE_NAME: Service name on exported spans (default: "clickhouse-consumer")
//! - LOG_LEVEL: Log filter (default: "info")

use anyhow::{Context, Result};
use clickhouse_consumer::shutdown::wait_for_signal;
use clickhouse_consumer::{ClickHouseEventWriter, ConsumerConfig, ConsumerService, KafkaSource};
use opentelemetry_config::{init_telemetry, TelemetryConfig};
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "clickhouse-consumer".to_string());
    let telemetry = init_telemetry(&service_name, TelemetryConfig::from_env())
        .context("Failed to initialize telemetry")?;

    let config = ConsumerConfig::from_env().context("Failed to load configuration")?;
    info!(
        kafka_brokers = %config.kafka.bootstrap_servers(),
        kafka_topic = %config.kafka.topic,
        kafka_group_id = %config.kafka.group_id,
        clickhouse_url = %config.clickhouse.url,
        clickhouse_database = %config.clickhouse.database,
        "Configuration loaded"
    );

    let source = KafkaSource::new(config.kafka.clone());
    let writer = ClickHouseEventWriter::new(&config.clickhouse);
    let mut service = ConsumerService::new(source, writer);

    // Setup shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    match service.start_until_shutdown(&mut shutdown_rx).await {
        Ok(true) => service.run(shutdown_rx).await?,
        Ok(false) => {}
        Err(e) => {
            service.stop().await;
            telemetry.shutdown();
            return Err(e).context("Failed to start consumer");
        }
    }

    telemetry.shutdown();
    Ok(())
}
