use std::time::Duration;

use crate::error::{ConsumerError, Result};

/// Kafka side of the consumer
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Broker addresses
    pub brokers: Vec<String>,
    /// Topic carrying tap events
    pub topic: String,
    /// Consumer group ID
    pub group_id: String,
    /// client.id reported to the brokers
    pub client_id: String,
}

impl KafkaConfig {
    /// Broker list in librdkafka `bootstrap.servers` form
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

/// ClickHouse side of the consumer
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub table: String,
    /// Upper bound on a single insert; `None` waits indefinitely
    pub insert_timeout: Option<Duration>,
}

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub kafka: KafkaConfig,
    pub clickhouse: ClickHouseConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            kafka: KafkaConfig {
                brokers: vec!["localhost:19092".to_string()],
                topic: "stream-place-events".to_string(),
                group_id: "clickhouse-consumer".to_string(),
                client_id: "clickhouse-consumer".to_string(),
            },
            clickhouse: ClickHouseConfig {
                url: "http://localhost:8123".to_string(),
                database: "sp_stats".to_string(),
                user: "default".to_string(),
                password: String::new(),
                table: "stream_place_events".to_string(),
                insert_timeout: None,
            },
        }
    }
}

impl ConsumerConfig {
    /// Load configuration from the environment
    ///
    /// Every variable is optional; unset or unparseable values keep the default.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let brokers: Vec<String> = std::env::var("KAFKA_BROKERS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.kafka.brokers);

        if brokers.is_empty() {
            return Err(ConsumerError::Config(
                "KAFKA_BROKERS must name at least one broker".to_string(),
            ));
        }

        let insert_timeout = std::env::var("CLICKHOUSE_INSERT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Ok(Self {
            kafka: KafkaConfig {
                brokers,
                topic: std::env::var("KAFKA_TOPIC").unwrap_or(defaults.kafka.topic),
                group_id: std::env::var("KAFKA_GROUP_ID").unwrap_or(defaults.kafka.group_id),
                client_id: std::env::var("KAFKA_CLIENT_ID").unwrap_or(defaults.kafka.client_id),
            },
            clickhouse: ClickHouseConfig {
                url: std::env::var("CLICKHOUSE_URL").unwrap_or(defaults.clickhouse.url),
                database: std::env::var("CLICKHOUSE_DATABASE")
                    .unwrap_or(defaults.clickhouse.database),
                user: std::env::var("CLICKHOUSE_USER").unwrap_or(defaults.clickhouse.user),
                password: std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default(),
                table: std::env::var("CLICKHOUSE_TABLE").unwrap_or(defaults.clickhouse.table),
                insert_timeout,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "KAFKA_BROKERS",
        "KAFKA_TOPIC",
        "KAFKA_GROUP_ID",
        "KAFKA_CLIENT_ID",
        "CLICKHOUSE_URL",
        "CLICKHOUSE_DATABASE",
        "CLICKHOUSE_USER",
        "CLICKHOUSE_PASSWORD",
        "CLICKHOUSE_TABLE",
        "CLICKHOUSE_INSERT_TIMEOUT_MS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        clear_env();
        let config = ConsumerConfig::from_env().unwrap();

        assert_eq!(config.kafka.brokers, vec!["localhost:19092"]);
        assert_eq!(config.kafka.topic, "stream-place-events");
        assert_eq!(config.kafka.group_id, "clickhouse-consumer");
        assert_eq!(config.clickhouse.url, "http://localhost:8123");
        assert_eq!(config.clickhouse.database, "sp_stats");
        assert_eq!(config.clickhouse.table, "stream_place_events");
        assert!(config.clickhouse.insert_timeout.is_none());
    }

    #[test]
    #[serial]
    fn test_overrides_from_env() {
        clear_env();
        std::env::set_var("KAFKA_BROKERS", "kafka-1:9092, kafka-2:9092,");
        std::env::set_var("KAFKA_TOPIC", "events");
        std::env::set_var("CLICKHOUSE_DATABASE", "analytics");
        std::env::set_var("CLICKHOUSE_INSERT_TIMEOUT_MS", "2500");

        let config = ConsumerConfig::from_env().unwrap();

        assert_eq!(config.kafka.brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
        assert_eq!(config.kafka.bootstrap_servers(), "kafka-1:9092,kafka-2:9092");
        assert_eq!(config.kafka.topic, "events");
        assert_eq!(config.clickhouse.database, "analytics");
        assert_eq!(
            config.clickhouse.insert_timeout,
            Some(Duration::from_millis(2500))
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_timeout_is_ignored() {
        clear_env();
        std::env::set_var("CLICKHOUSE_INSERT_TIMEOUT_MS", "soon");
        let config = ConsumerConfig::from_env().unwrap();
        assert!(config.clickhouse.insert_timeout.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_empty_broker_list_is_rejected() {
        clear_env();
        std::env::set_var("KAFKA_BROKERS", " , ");
        assert!(matches!(
            ConsumerConfig::from_env(),
            Err(ConsumerError::Config(_))
        ));
        clear_env();
    }
}
