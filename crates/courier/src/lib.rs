//! # Courier
//!
//! Event routing with per-destination middleware chains over message brokers.
//!
//! ## Overview
//!
//! A service declares, once at startup, which destinations receive each event
//! and which middlewares wrap the handler at every destination. Publishing an
//! event fans one payload out to all its destinations; consuming runs each
//! delivery through its destination's chain and settles it exactly once.
//!
//! ## Architecture
//!
//! ```text
//!                         ┌──────────────┐
//! publish("orders.created")│  Publisher   │──▶ billing  ──▶ Dispatcher ──▶ [M1 ▶ M2 ▶ handler]
//!                         │ (RouteTable) │──▶ shipping ──▶ Dispatcher ──▶ [M3 ▶ handler]
//!                         └──────────────┘──▶ audit    ──▶ Dispatcher ──▶ [handler]
//! ```
//!
//! - **Runtime**: Configuration, logging and consumer loops
//! - **Route table**: Event identifiers bound to destinations, frozen at startup
//! - **Middlewares**: Onion-ordered `before`/`after`/`on_failure` phases
//! - **Handlers**: Async functions with extractor arguments (Axum-style)
//! - **Brokers**: In-memory for tests, AMQP with the `amqp` feature
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! #[derive(Deserialize)]
//! struct Order { id: u64 }
//!
//! async fn bill(Json(order): Json<Order>) -> Result<(), ProcessingError> {
//!     tracing::info!(order_id = order.id, "billing");
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut routes = RouteTable::new();
//!     routes.register(
//!         "orders.created",
//!         Destination::new("billing").middleware(LoggingMiddleware::new()).handler(bill),
//!     )?;
//!
//!     let runtime = CourierRuntime::builder()
//!         .broker(Arc::new(MemoryBroker::new()))
//!         .routes(routes)
//!         .build()?;
//!
//!     runtime.publisher().publish("orders.created", &json!({ "id": 1 })).await;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output
//! - `amqp`: the lapin-based AMQP broker adapter

pub use courier_core as core;
pub use courier_framework as framework;
pub use courier_runtime as runtime;

#[cfg(feature = "amqp")]
pub use courier_adapter_amqp as amqp;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use courier::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use courier_runtime::{ConfigLoader, ConsumeStats, CourierConfig, CourierRuntime};

    // Registration
    pub use courier_framework::{Destination, RouteTable, Router};

    // Middlewares
    pub use courier_framework::{Flow, Guard, LoggingMiddleware, Middleware, Recovery};

    // Extractors - for handler parameters
    pub use courier_framework::{Json, Metadata, Payload, RouteKey, State};

    // Publishing and outcomes
    pub use courier_framework::{Outcome, PublishOptions, PublishReport, Publisher};

    // Core types
    pub use courier_core::{
        BrokerClient, Context, DeliveryMetadata, Inbound, MemoryBroker, ProcessingError,
    };

    #[cfg(feature = "amqp")]
    pub use courier_adapter_amqp::{AmqpBroker, AmqpConfig};
}
