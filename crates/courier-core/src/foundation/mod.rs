//! Foundation layer - Core abstractions and type system.
//!
//! This module contains the fundamental building blocks of Courier:
//! - Identifiers for events and destinations
//! - Deliveries and their acknowledgment handles
//! - The per-execution context
//! - The error taxonomy

pub mod context;
pub mod delivery;
pub mod error;
pub mod ident;

pub use context::Context;
pub use delivery::{
    AckAction, Acknowledger, DeliveryMetadata, Inbound, RETRY_COUNT_HEADER, ROUTE_KEY_HEADER,
    RawDelivery,
};
pub use error::{
    BoxError, BrokerError, BrokerResult, CodecError, ConfigError, ConfigResult, ErrorKind,
    ProcessingError, ProcessingResult, RoutingError,
};
pub use ident::{Address, EventId};
