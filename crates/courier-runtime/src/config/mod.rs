//! Configuration module for the Courier runtime.
//!
//! Configuration is layered with figment (defaults, files, `COURIER_*`
//! environment variables) and validated before the runtime starts.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, load_config, load_config_from_file};
pub use schema::{
    ConsumerConfig, CourierConfig, LogFormat, LogLevel, LoggingConfig, RetryConfig, ServiceConfig,
};
pub use validation::validate_config;
