//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use figment::value::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::ConfigResult;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CourierConfig {
    /// Identity of this service.
    #[serde(default)]
    pub service: ServiceConfig,

    /// The `[broker]` table, left raw for the broker adapter to interpret.
    /// See [`broker_settings`](Self::broker_settings).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<Value>,

    /// Consumer settings.
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Redelivery bound for retryable failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CourierConfig {
    /// Deserializes the `[broker]` table into an adapter's settings type,
    /// such as `AmqpConfig`. Falls back to `T::default()` when the table is
    /// absent.
    pub fn broker_settings<T>(&self) -> ConfigResult<T>
    where
        T: DeserializeOwned + Default,
    {
        match &self.broker {
            Some(table) => Ok(table.deserialize()?),
            None => Ok(T::default()),
        }
    }
}

/// Service identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, used in logs.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// When set, every registered event id must contain this key as one of
    /// its dot-separated segments.
    #[serde(default)]
    pub routing_key: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            routing_key: None,
        }
    }
}

fn default_service_name() -> String {
    "courier".to_string()
}

/// Consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Addresses consumed by [`run`](crate::CourierRuntime::run).
    #[serde(default)]
    pub queues: Vec<String>,

    /// Maximum deliveries processed at once per queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-delivery chain timeout in milliseconds. Unbounded when absent.
    #[serde(default)]
    pub handler_timeout_ms: Option<u64>,

    /// How long shutdown waits for in-flight deliveries, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl ConsumerConfig {
    /// Returns the chain timeout, if any.
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queues: Vec::new(),
            concurrency: default_concurrency(),
            handler_timeout_ms: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_concurrency() -> usize {
    10
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Redeliveries allowed before a retryable failure is rejected.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

impl RetryConfig {
    /// Converts to the dispatcher's retry policy.
    pub fn to_policy(&self) -> courier_framework::RetryPolicy {
        courier_framework::RetryPolicy::new(self.max_retries)
    }
}

fn default_max_retries() -> u32 {
    courier_framework::RetryPolicy::DEFAULT_MAX_RETRIES
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace.
    Trace,
    /// Debug.
    Debug,
    /// Info.
    #[default]
    Info,
    /// Warn.
    Warn,
    /// Error.
    Error,
}

impl LogLevel {
    /// Returns the lowercase name used in filter directives.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line output with span fields inlined.
    #[default]
    Compact,
    /// Multi-line output for local development.
    Pretty,
    /// Newline-delimited JSON (requires the `json-log` feature).
    Json,
}

/// Logging configuration.
///
/// ```toml
/// [logging]
/// level = "info"
/// format = "json"
/// file = "/var/log/courier/billing.log"
/// span_timings = true
///
/// [logging.filters]
/// lapin = "warn"
///
/// [logging.queues]
/// billing = "debug"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global level. `RUST_LOG`, when set, replaces it.
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `courier_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    /// Per-queue levels, applied to everything logged while a delivery from
    /// that queue is dispatched.
    #[serde(default)]
    pub queues: HashMap<String, LogLevel>,

    /// Line format.
    #[serde(default)]
    pub format: LogFormat,

    /// Write to this file instead of standard output.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Emit one line with busy and idle time when a `dispatch` or `publish`
    /// span closes.
    #[serde(default)]
    pub span_timings: bool,
}
