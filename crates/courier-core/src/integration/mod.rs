//! Integration layer - External system interfaces.
//!
//! This module contains the seams Courier uses to reach outside itself:
//! - The broker-client collaborator ([`BrokerClient`])
//! - The payload codec capability ([`Codec`])
//! - An in-process broker for tests and demos ([`MemoryBroker`])

pub mod broker;
pub mod codec;
pub mod memory;

pub use broker::{BoxedBroker, BrokerClient, DeliveryStream, Envelope};
pub use codec::{BoxedCodec, Codec, JsonCodec};
pub use memory::{AckRecord, MemoryBroker};
