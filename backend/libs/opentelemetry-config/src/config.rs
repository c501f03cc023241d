//! Telemetry configuration structures

use serde::{Deserialize, Serialize};

/// Default OTLP/HTTP traces endpoint of a local collector
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318/v1/traces";

/// Path the OTLP/HTTP exporter appends to the collector base URL
const TRACES_PATH: &str = "/v1/traces";

/// Configuration for logging and distributed tracing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Export spans to the OTLP collector. Logging is always initialised.
    pub enabled: bool,

    /// OTLP/HTTP traces endpoint
    /// Example: "http://localhost:4318/v1/traces"
    pub otlp_endpoint: String,

    /// Sample rate (0.0 to 1.0)
    pub sample_rate: f64,

    /// Service version reported as `service.version`
    pub service_version: String,

    /// Log filter directive, e.g. "info" or "clickhouse_consumer=debug,rdkafka=warn"
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            sample_rate: 1.0,
            service_version: "dev".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `TRACING_ENABLED`: Export spans (true/false, default: true)
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP traces endpoint (default: http://localhost:4318/v1/traces)
    /// - `TRACING_SAMPLE_RATE`: Sample rate (0.0-1.0, default: 1.0)
    /// - `SERVICE_VERSION`: Service version
    /// - `LOG_LEVEL`: Log filter directive (default: info)
    pub fn from_env() -> Self {
        let enabled = std::env::var("TRACING_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(true);

        let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string());

        let sample_rate = std::env::var("TRACING_SAMPLE_RATE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(1.0)
            .clamp(0.0, 1.0);

        let service_version = std::env::var("SERVICE_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self {
            enabled,
            otlp_endpoint,
            sample_rate,
            service_version,
            log_level,
        }
    }

    /// Collector base URL handed to the exporter, which appends `/v1/traces` itself
    pub fn collector_base_url(&self) -> String {
        let trimmed = self.otlp_endpoint.trim().trim_end_matches('/');
        trimmed
            .strip_suffix(TRACES_PATH)
            .unwrap_or(trimmed)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert!(config.enabled);
        assert_eq!(config.otlp_endpoint, DEFAULT_OTLP_ENDPOINT);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_collector_base_url_strips_traces_path() {
        let config = TelemetryConfig::default();
        assert_eq!(config.collector_base_url(), "http://localhost:4318");

        let config = TelemetryConfig {
            otlp_endpoint: "http://otel:4318/".to_string(),
            ..TelemetryConfig::default()
        };
        assert_eq!(config.collector_base_url(), "http://otel:4318");
    }

    #[test]
    #[serial]
    fn test_sample_rate_clamping() {
        std::env::set_var("TRACING_SAMPLE_RATE", "2.5");
        let config = TelemetryConfig::from_env();
        assert_eq!(config.sample_rate, 1.0);
        std::env::remove_var("TRACING_SAMPLE_RATE");
    }

    #[test]
    #[serial]
    fn test_from_env_reads_log_level_and_endpoint() {
        std::env::set_var("LOG_LEVEL", "debug");
        std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4318/v1/traces");
        let config = TelemetryConfig::from_env();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.collector_base_url(), "http://collector:4318");
        std::env::remove_var("LOG_LEVEL");
        std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
    }
}
