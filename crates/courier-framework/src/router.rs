//! Prefix groups of routes.
//!
//! A [`Router`] collects routes under a shared dot-joined prefix so a module
//! can declare its routes without knowing where it is mounted:
//!
//! ```rust,ignore
//! let orders = Router::new()
//!     .prefix("orders")
//!     .route("created", Destination::new("billing").handler(bill))
//!     .route("cancelled", Destination::new("billing").handler(refund));
//!
//! routes.include(orders)?; // registers orders.created and orders.cancelled
//! ```

use courier_core::EventId;

use crate::route::Destination;

/// A group of routes sharing a prefix.
#[derive(Debug, Default, Clone)]
pub struct Router {
    prefix: Option<String>,
    routes: Vec<(String, Destination)>,
}

impl Router {
    /// Creates an empty router without a prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the prefix prepended to every route key.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Adds a route.
    pub fn route(mut self, key: impl Into<String>, destination: Destination) -> Self {
        self.routes.push((key.into(), destination));
        self
    }

    /// Adds every route of `other`, keeping its own prefix inside this one.
    pub fn merge(mut self, other: Router) -> Self {
        for (event_id, destination) in other.into_routes() {
            self.routes.push((event_id.to_string(), destination));
        }
        self
    }

    /// Returns the number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if the router has no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Consumes the router, yielding fully-prefixed routes in order.
    pub fn into_routes(self) -> impl Iterator<Item = (EventId, Destination)> {
        let prefix = self.prefix;
        self.routes.into_iter().map(move |(key, destination)| {
            let event_id = match prefix.as_deref() {
                Some(p) if !p.is_empty() => EventId::from(format!("{p}.{key}")),
                _ => EventId::from(key),
            };
            (event_id, destination)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_dot_joined() {
        let router = Router::new()
            .prefix("shop")
            .merge(
                Router::new()
                    .prefix("orders")
                    .route("created", Destination::new("q")),
            )
            .route("ping", Destination::new("q"));

        let ids: Vec<_> = router.into_routes().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, ["shop.orders.created", "shop.ping"]);
    }
}
