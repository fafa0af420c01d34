//! Courier Runtime - orchestration layer for the Courier messaging framework.
//!
//! This crate provides:
//! - Layered configuration (`config`): figment over defaults, TOML/YAML files
//!   and `COURIER_*` environment variables
//! - Logging setup (`logging`) over `tracing-subscriber`, with per-queue levels
//! - The [`CourierRuntime`]: freezes the route table, hands out publishers and
//!   runs bounded-concurrency consumer loops with graceful shutdown
//!
//! ```ignore
//! use courier_runtime::CourierRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = CourierRuntime::builder()
//!         .broker(broker)
//!         .routes(routes)
//!         .build()?;
//!
//!     // Consume every configured queue until Ctrl+C
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{ConfigLoader, CourierConfig, LoggingConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{ConsumeStats, CourierRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the commonly used logging macros along with `Level`.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
