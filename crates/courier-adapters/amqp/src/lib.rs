//! # Courier Adapter for AMQP 0-9-1
//!
//! Connects Courier to RabbitMQ (or any AMQP 0-9-1 broker) through `lapin`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier_adapter_amqp::{AmqpBroker, AmqpConfig};
//! use courier_runtime::CourierRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broker = AmqpBroker::connect(AmqpConfig::new("amqp://localhost:5672")).await?;
//!     let runtime = CourierRuntime::builder()
//!         .broker(Arc::new(broker))
//!         .routes(routes)
//!         .build()?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Topology
//!
//! ```text
//! publish("orders.created")
//!        │  routing key = destination address
//!        ▼
//!  [topic exchange] ──binding "billing"──▶ queue billing
//!                   ──binding "shipping"─▶ queue shipping
//! ```
//!
//! The event identifier travels in the `x-route-key` header and the retry
//! count in `x-retry-count`.

pub mod broker;
pub mod config;
pub mod headers;

pub use broker::AmqpBroker;
pub use config::AmqpConfig;
