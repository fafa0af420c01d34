//! Extractor system for the Courier framework.
//!
//! This module provides the [`FromInbound`] trait, which defines how types
//! can be extracted from a delivery and its [`Context`] for use as handler
//! parameters.
//!
//! Extraction is synchronous and produces owned values, so handler futures
//! never borrow from the chain.

use std::ops::Deref;

use courier_core::{Context, DeliveryMetadata, EventId, Inbound};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ExtractError;

/// A trait for types that can be extracted from an inbound delivery.
///
/// When extraction fails the handler is not called and the chain fails with a
/// permanent [`Extract`](courier_core::ErrorKind::Extract) error.
///
/// # Example
///
/// ```rust,ignore
/// use courier_framework::{ExtractError, FromInbound};
///
/// struct TraceId(String);
///
/// impl FromInbound for TraceId {
///     fn from_inbound(_ctx: &Context, msg: &Inbound) -> Result<Self, ExtractError> {
///         msg.metadata
///             .headers
///             .get("x-trace-id")
///             .map(|id| TraceId(id.clone()))
///             .ok_or_else(|| ExtractError::custom("missing x-trace-id"))
///     }
/// }
/// ```
pub trait FromInbound: Sized {
    /// Attempts to extract this type from the given delivery.
    fn from_inbound(ctx: &Context, msg: &Inbound) -> Result<Self, ExtractError>;
}

/// Implementation for `Option<T>` where `T: FromInbound`.
///
/// This allows handlers to have optional parameters.
impl<T: FromInbound> FromInbound for Option<T> {
    fn from_inbound(ctx: &Context, msg: &Inbound) -> Result<Self, ExtractError> {
        Ok(T::from_inbound(ctx, msg).ok())
    }
}

/// The payload deserialized into `T`.
///
/// A payload that does not fit `T` is a permanent failure: redelivering the
/// same bytes cannot succeed.
///
/// ```rust,ignore
/// #[derive(Deserialize)]
/// struct OrderCreated { id: u64 }
///
/// async fn on_created(Json(order): Json<OrderCreated>) {
///     println!("order {}", order.id);
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> FromInbound for Json<T> {
    fn from_inbound(_ctx: &Context, msg: &Inbound) -> Result<Self, ExtractError> {
        T::deserialize(&msg.payload)
            .map(Json)
            .map_err(|e| ExtractError::PayloadMismatch {
                expected: std::any::type_name::<T>(),
                reason: e.to_string(),
            })
    }
}

impl<T> Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// The decoded payload as an untyped JSON value.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload(pub Value);

impl FromInbound for Payload {
    fn from_inbound(_ctx: &Context, msg: &Inbound) -> Result<Self, ExtractError> {
        Ok(Payload(msg.payload.clone()))
    }
}

/// The broker metadata of the delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata(pub DeliveryMetadata);

impl FromInbound for Metadata {
    fn from_inbound(_ctx: &Context, msg: &Inbound) -> Result<Self, ExtractError> {
        Ok(Metadata(msg.metadata.clone()))
    }
}

impl Deref for Metadata {
    type Target = DeliveryMetadata;

    fn deref(&self) -> &DeliveryMetadata {
        &self.0
    }
}

/// The route key the delivery arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteKey(pub EventId);

impl FromInbound for RouteKey {
    fn from_inbound(_ctx: &Context, msg: &Inbound) -> Result<Self, ExtractError> {
        Ok(RouteKey(msg.route_key.clone()))
    }
}

/// A clone of a value a middleware stored in the [`Context`].
///
/// ```rust,ignore
/// async fn audit(State(tenant): State<TenantId>, Payload(body): Payload) {
///     // ...
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct State<T>(pub T);

impl<T: Clone + Send + Sync + 'static> FromInbound for State<T> {
    fn from_inbound(ctx: &Context, _msg: &Inbound) -> Result<Self, ExtractError> {
        ctx.get::<T>()
            .cloned()
            .map(State)
            .ok_or(ExtractError::MissingState(std::any::type_name::<T>()))
    }
}

impl<T> Deref for State<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Order {
        id: u64,
    }

    #[test]
    fn test_json_extracts_typed_payload() {
        let msg = Inbound::new("orders.created", json!({"id": 42}));
        let Json(order) = Json::<Order>::from_inbound(&Context::new(), &msg).unwrap();
        assert_eq!(order, Order { id: 42 });
    }

    #[test]
    fn test_json_mismatch_is_reported() {
        let msg = Inbound::new("orders.created", json!({"id": "nope"}));
        let err = Json::<Order>::from_inbound(&Context::new(), &msg).unwrap_err();
        assert!(matches!(err, ExtractError::PayloadMismatch { .. }));
    }

    #[test]
    fn test_state_requires_value_in_context() {
        let msg = Inbound::new("orders.created", json!(null));
        let mut ctx = Context::new();
        assert!(State::<u32>::from_inbound(&ctx, &msg).is_err());
        assert!(Option::<State<u32>>::from_inbound(&ctx, &msg).unwrap().is_none());

        ctx.insert(7u32);
        assert_eq!(*State::<u32>::from_inbound(&ctx, &msg).unwrap(), 7);
    }
}
