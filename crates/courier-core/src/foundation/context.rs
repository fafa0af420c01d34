//! Per-execution state threaded through a middleware chain.
//!
//! A [`Context`] is created when a chain starts processing one delivery and
//! dropped when the chain finishes. It is handed to every phase as
//! `&mut Context`, so it is exclusively owned by a single execution and never
//! shared between concurrent deliveries.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// A scoped, typed key/value bag for one chain execution.
///
/// Values are keyed by their Rust type: one value per type, later inserts
/// overwrite earlier ones.
///
/// # Example
///
/// ```rust
/// use courier_core::Context;
///
/// #[derive(Clone, Debug, PartialEq)]
/// struct TenantId(String);
///
/// let mut ctx = Context::new();
/// ctx.insert(TenantId("acme".into()));
/// assert_eq!(ctx.get::<TenantId>(), Some(&TenantId("acme".into())));
/// ```
pub struct Context {
    started_at: Instant,
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Context {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            values: HashMap::new(),
        }
    }

    /// Returns the time since this context was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stores a value, returning the previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Returns a reference to the stored value of type `T`.
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns a mutable reference to the stored value of type `T`.
    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Returns `true` if a value of type `T` is stored.
    pub fn contains<T: 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns the stored value of type `T`.
    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    /// Returns the number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no values are stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("elapsed", &self.elapsed())
            .field("values", &self.values.len())
            .finish()
    }
}
