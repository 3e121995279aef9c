use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON log lines on stdout; plain text when false
    #[serde(default = "default_log_json")]
    pub log_json: bool,

    /// Path to the flat JSON property file holding `project.id`, `packet.*` and `rule-engine.*`
    #[serde(default = "default_pipeline_config_path")]
    pub pipeline_config_path: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Batch size for every consumer
    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Redelivery ceiling for every durable consumer; 0 keeps the server default
    #[serde(default = "default_nats_max_deliver")]
    pub nats_max_deliver: i64,

    /// Prefix of every durable consumer name
    #[serde(default = "default_nats_consumer_prefix")]
    pub nats_consumer_prefix: String,

    /// Object store bucket holding the retention-window archive
    #[serde(default = "default_nats_archive_bucket")]
    pub nats_archive_bucket: String,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // ClickHouse configuration
    /// ClickHouse HTTP URL
    #[serde(default = "default_clickhouse_url")]
    pub clickhouse_url: String,

    #[serde(default = "default_clickhouse_database")]
    pub clickhouse_database: String,

    #[serde(default = "default_clickhouse_username")]
    pub clickhouse_username: String,

    #[serde(default = "default_clickhouse_password")]
    pub clickhouse_password: String,

    /// Physical table backing every logical column-store table
    #[serde(default = "default_clickhouse_table")]
    pub clickhouse_table: String,

    // Stage timing
    /// Interval of the deserializer heartbeat tick in seconds
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Interval of the rule-state snapshot flush in seconds
    #[serde(default = "default_rule_state_flush_interval_secs")]
    pub rule_state_flush_interval_secs: u64,

    /// Time allowed for closers (rule-state flush, telemetry shutdown)
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    /// Service name for OpenTelemetry resource
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_json() -> bool {
    true
}

fn default_pipeline_config_path() -> String {
    "/etc/hyperstream/pipeline.json".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_batch_size() -> usize {
    30
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_nats_max_deliver() -> i64 {
    10
}

fn default_nats_consumer_prefix() -> String {
    "hyperstream".to_string()
}

fn default_nats_archive_bucket() -> String {
    "hyperstream-archive".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// ClickHouse defaults
fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_database() -> String {
    "hyperstream".to_string()
}

fn default_clickhouse_username() -> String {
    "hyperstream".to_string()
}

fn default_clickhouse_password() -> String {
    "hyperstream".to_string()
}

fn default_clickhouse_table() -> String {
    "cells".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    1
}

fn default_rule_state_flush_interval_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "hyperstream-all-in-one".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("HYPERSTREAM"))
            .build()?
            .try_deserialize()
    }

    pub fn nats_batch_wait(&self) -> Duration {
        Duration::from_secs(self.nats_batch_wait_secs)
    }

    pub fn max_deliver(&self) -> Option<i64> {
        (self.nats_max_deliver > 0).then_some(self.nats_max_deliver)
    }

    /// Durable consumer name of one stage, scoped to the project.
    pub fn consumer_name(&self, stage: &str, project_id: u64) -> String {
        format!("{}-{}-{}", self.nats_consumer_prefix, stage, project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::remove_var("HYPERSTREAM_LOG_LEVEL");
            std::env::remove_var("HYPERSTREAM_NATS_MAX_DELIVER");
        }

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.max_deliver(), Some(10));
        assert_eq!(config.consumer_name("rules", 3), "hyperstream-rules-3");
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::set_var("HYPERSTREAM_LOG_LEVEL", "debug");
            std::env::set_var("HYPERSTREAM_NATS_MAX_DELIVER", "0");
        }

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_deliver(), None);

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::remove_var("HYPERSTREAM_LOG_LEVEL");
            std::env::remove_var("HYPERSTREAM_NATS_MAX_DELIVER");
        }
    }
}
