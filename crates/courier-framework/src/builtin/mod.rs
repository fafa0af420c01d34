//! Built-in middlewares.
//!
//! - [`LoggingMiddleware`]: logs each delivery on entry, with its elapsed
//!   time on exit and with its error on the failure path.
//! - [`Guard`]: short-circuits deliveries that fail a predicate.

mod guard;
mod logging;

pub use guard::Guard;
pub use logging::LoggingMiddleware;
