//! # Courier Core
//!
//! The shared vocabulary of the Courier event-routing framework.
//!
//! This crate defines the types every other Courier crate speaks: identifiers,
//! deliveries and their acknowledgment handles, the per-execution context, the
//! error taxonomy, and the broker and codec seams.
//!
//! ## Architecture Layers
//!
//! ### Foundation Layer
//!
//! Core abstractions and type system:
//! - **Identifiers**: Event identifiers and destination addresses ([`EventId`], [`Address`])
//! - **Deliveries**: Broker deliveries and acknowledgment ([`RawDelivery`], [`Acknowledger`])
//! - **Context**: Typed per-execution scratch space ([`Context`])
//! - **Errors**: Registration, routing, broker and processing errors ([`ProcessingError`])
//!
//! ### Integration Layer
//!
//! External system interfaces:
//! - **Broker Client**: Send and subscribe primitives ([`BrokerClient`])
//! - **Codec**: Payload encoding ([`Codec`], [`JsonCodec`])
//! - **Memory Broker**: In-process broker for tests and demos ([`MemoryBroker`])
//!
//! ## Message Flow
//!
//! ```text
//! ┌───────────┐  Envelope   ┌──────────────┐  RawDelivery  ┌──────────────┐
//! │ Publisher │────────────▶│ BrokerClient │──────────────▶│  Dispatcher  │
//! └───────────┘             └──────────────┘               └──────────────┘
//!                                   ▲                              │
//!                                   └──────── ack / requeue ───────┘
//! ```

// Architectural layers
pub mod foundation;
pub mod integration;

// Re-export foundation types
pub use foundation::{
    AckAction, Acknowledger, Address, BoxError, BrokerError, BrokerResult, CodecError,
    ConfigError, ConfigResult, Context, DeliveryMetadata, ErrorKind, EventId, Inbound,
    ProcessingError, ProcessingResult, RETRY_COUNT_HEADER, ROUTE_KEY_HEADER, RawDelivery,
    RoutingError,
};

// Re-export integration types
pub use integration::{
    AckRecord, BoxedBroker, BoxedCodec, BrokerClient, Codec, DeliveryStream, Envelope, JsonCodec,
    MemoryBroker,
};

/// A boxed future, as used by handlers and middlewares.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;

/// Prelude for common imports.
pub mod prelude {
    pub use super::BoxFuture;
    pub use super::foundation::*;
    pub use super::integration::{BrokerClient, Codec, Envelope, JsonCodec, MemoryBroker};
}
