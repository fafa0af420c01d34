//! The route table.
//!
//! A [`RouteTable`] maps each event identifier to the destinations bound to
//! it. It is built once at startup, frozen with [`RouteTable::freeze`], and
//! then shared read-only (typically as `Arc<RouteTable>`) by publishers and
//! dispatchers.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_framework::{Destination, RouteTable};
//!
//! let mut routes = RouteTable::new();
//! routes.register_middleware("audit", AuditMiddleware::default())?;
//! routes.register(
//!     "orders.created",
//!     Destination::new("billing").named("audit").handler(bill_order),
//! )?;
//! routes.register(
//!     "orders.created",
//!     Destination::new("shipping").handler(ship_order),
//! )?;
//! routes.freeze();
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use courier_core::{Address, ConfigError, ConfigResult, EventId};
use tracing::debug;

use crate::chain::MiddlewareChain;
use crate::handler::{BoxedHandler, Handler, into_handler};
use crate::middleware::{BoxedMiddleware, Middleware};
use crate::router::Router;

/// A middleware given directly or by registered name.
#[derive(Clone)]
pub enum MiddlewareRef {
    /// A concrete middleware.
    Instance(BoxedMiddleware),
    /// A name resolved against the table's middleware registry.
    Named(String),
}

impl std::fmt::Debug for MiddlewareRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instance(m) => f.debug_tuple("Instance").field(&m.name()).finish(),
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
        }
    }
}

/// Registration input: one destination with its middlewares and handler.
#[derive(Clone)]
pub struct Destination {
    address: Address,
    middlewares: Vec<MiddlewareRef>,
    handler: Option<BoxedHandler>,
}

impl Destination {
    /// Starts a destination for the given address.
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: address.into(),
            middlewares: Vec::new(),
            handler: None,
        }
    }

    /// Appends a middleware.
    pub fn middleware<M: Middleware>(self, middleware: M) -> Self {
        self.middleware_arc(Arc::new(middleware))
    }

    /// Appends a shared middleware.
    pub fn middleware_arc(mut self, middleware: BoxedMiddleware) -> Self {
        self.middlewares.push(MiddlewareRef::Instance(middleware));
        self
    }

    /// Appends a middleware by registered name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.middlewares.push(MiddlewareRef::Named(name.into()));
        self
    }

    /// Sets the terminal handler.
    pub fn handler<F, T>(mut self, f: F) -> Self
    where
        F: Handler<T>,
        T: 'static,
    {
        self.handler = Some(into_handler(f));
        self
    }

    /// Sets a pre-built boxed handler.
    pub fn handler_boxed(mut self, handler: BoxedHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Returns the destination address.
    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("address", &self.address)
            .field("middlewares", &self.middlewares)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// An event identifier bound to one destination with its resolved chain.
#[derive(Debug)]
pub struct Binding {
    /// The bound event.
    pub event_id: EventId,
    /// The destination address.
    pub address: Address,
    /// The middlewares and handler run for deliveries on this binding.
    pub chain: MiddlewareChain,
}

/// Maps event identifiers to their bound destinations.
///
/// Lookups never fail: an event with no bindings resolves to an empty slice.
/// Registration fails fast with a [`ConfigError`] and leaves the table
/// unchanged.
#[derive(Default)]
pub struct RouteTable {
    bindings: HashMap<EventId, Vec<Arc<Binding>>>,
    by_address: HashMap<Address, HashMap<EventId, Arc<Binding>>>,
    middlewares: HashMap<String, BoxedMiddleware>,
    scope: Option<String>,
    frozen: bool,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires every registered event identifier to contain `service_key` as
    /// one of its dot-separated segments.
    pub fn with_scope(mut self, service_key: impl Into<String>) -> Self {
        self.scope = Some(service_key.into());
        self
    }

    /// Returns the required service key, if any.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Registers a named middleware for [`Destination::named`] references.
    pub fn register_middleware<M: Middleware>(
        &mut self,
        name: impl Into<String>,
        middleware: M,
    ) -> ConfigResult<()> {
        self.register_middleware_arc(name, Arc::new(middleware))
    }

    /// Registers a shared named middleware.
    pub fn register_middleware_arc(
        &mut self,
        name: impl Into<String>,
        middleware: BoxedMiddleware,
    ) -> ConfigResult<()> {
        self.ensure_building()?;
        let name = name.into();
        if self.middlewares.contains_key(&name) {
            return Err(ConfigError::DuplicateMiddleware(name));
        }
        self.middlewares.insert(name, middleware);
        Ok(())
    }

    /// Binds `event_id` to a destination.
    ///
    /// Bindings for one event are kept in registration order.
    pub fn register(
        &mut self,
        event_id: impl Into<EventId>,
        destination: Destination,
    ) -> ConfigResult<()> {
        self.ensure_building()?;
        let binding = self.prepare(event_id.into(), destination)?;
        self.insert(binding);
        Ok(())
    }

    /// Registers every route of a router, applying its prefix.
    ///
    /// Either all routes are registered or none are.
    pub fn include(&mut self, router: Router) -> ConfigResult<()> {
        self.ensure_building()?;

        let mut seen = HashSet::new();
        let mut prepared = Vec::new();
        for (event_id, destination) in router.into_routes() {
            if !seen.insert((destination.address().clone(), event_id.clone())) {
                return Err(ConfigError::DuplicateBinding {
                    event_id: event_id.to_string(),
                    address: destination.address().to_string(),
                });
            }
            prepared.push(self.prepare(event_id, destination)?);
        }

        for binding in prepared {
            self.insert(binding);
        }
        Ok(())
    }

    /// Closes registration. Idempotent.
    pub fn freeze(&mut self) {
        if !self.frozen {
            debug!(
                events = self.bindings.len(),
                bindings = self.len(),
                "Route table frozen"
            );
        }
        self.frozen = true;
    }

    /// Returns `true` once the table is frozen.
    pub fn is_ready(&self) -> bool {
        self.frozen
    }

    /// Returns the bindings for an event in registration order.
    pub fn resolve(&self, event_id: &str) -> &[Arc<Binding>] {
        self.bindings
            .get(event_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the binding a consumer on `address` uses for `route_key`.
    pub fn resolve_for_delivery(&self, address: &str, route_key: &str) -> Option<Arc<Binding>> {
        self.by_address.get(address)?.get(route_key).cloned()
    }

    /// Returns every event identifier with at least one binding.
    pub fn event_ids(&self) -> impl Iterator<Item = &EventId> {
        self.bindings.keys()
    }

    /// Returns every address with at least one binding.
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.by_address.keys()
    }

    /// Returns the total number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn ensure_building(&self) -> ConfigResult<()> {
        if self.frozen {
            Err(ConfigError::Frozen)
        } else {
            Ok(())
        }
    }

    /// Validates a registration and resolves its chain without mutating.
    fn prepare(&self, event_id: EventId, destination: Destination) -> ConfigResult<Binding> {
        if event_id.is_empty() {
            return Err(ConfigError::EmptyEventId);
        }
        if let Some(scope) = &self.scope
            && !event_id.segments().any(|segment| segment == scope)
        {
            return Err(ConfigError::OutOfScope {
                event_id: event_id.to_string(),
                scope: scope.clone(),
            });
        }

        let Destination {
            address,
            middlewares,
            handler,
        } = destination;

        if address.is_empty() {
            return Err(ConfigError::EmptyAddress {
                event_id: event_id.to_string(),
            });
        }
        if self
            .by_address
            .get(&address)
            .is_some_and(|events| events.contains_key(&event_id))
        {
            return Err(ConfigError::DuplicateBinding {
                event_id: event_id.to_string(),
                address: address.to_string(),
            });
        }

        let resolved = middlewares
            .into_iter()
            .map(|middleware| match middleware {
                MiddlewareRef::Instance(m) => Ok(m),
                MiddlewareRef::Named(name) => self.middlewares.get(&name).cloned().ok_or_else(
                    || ConfigError::UnknownMiddleware {
                        name,
                        event_id: event_id.to_string(),
                    },
                ),
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        let handler = handler.ok_or_else(|| ConfigError::MissingHandler {
            event_id: event_id.to_string(),
            address: address.to_string(),
        })?;

        Ok(Binding {
            event_id,
            address,
            chain: MiddlewareChain::new(resolved, handler),
        })
    }

    fn insert(&mut self, binding: Binding) {
        debug!(
            event_id = %binding.event_id,
            address = %binding.address,
            middlewares = binding.chain.middlewares().len(),
            "Registered binding"
        );
        let binding = Arc::new(binding);
        self.by_address
            .entry(binding.address.clone())
            .or_default()
            .insert(binding.event_id.clone(), Arc::clone(&binding));
        self.bindings
            .entry(binding.event_id.clone())
            .or_default()
            .push(binding);
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("events", &self.bindings.len())
            .field("bindings", &self.len())
            .field("scope", &self.scope)
            .field("frozen", &self.frozen)
            .finish()
    }
}
