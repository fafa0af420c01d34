//! # Courier Framework
//!
//! The event-routing engine of Courier.
//!
//! This layer provides:
//! - [`RouteTable`] and [`Router`] mapping event identifiers to destinations
//! - [`Middleware`] and [`MiddlewareChain`], an onion of middlewares around a
//!   terminal handler
//! - An Axum-style [`Handler`] system with [`FromInbound`] extractors
//! - [`Dispatcher`], turning a chain outcome into exactly one acknowledgment
//! - [`Publisher`], fanning one publish out to every bound destination
//! - Built-in middlewares ([`LoggingMiddleware`], [`Guard`])
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use courier_framework::{Destination, Dispatcher, Json, LoggingMiddleware, Publisher, RouteTable};
//!
//! async fn bill(Json(order): Json<OrderCreated>) -> Result<(), ProcessingError> {
//!     // ...
//!     Ok(())
//! }
//!
//! let mut routes = RouteTable::new();
//! routes.register(
//!     "orders.created",
//!     Destination::new("billing").middleware(LoggingMiddleware::new()).handler(bill),
//! )?;
//! routes.freeze();
//! let routes = Arc::new(routes);
//!
//! let publisher = Publisher::new(Arc::clone(&routes), broker, JsonCodec::shared())?;
//! let dispatcher = Dispatcher::new(routes, "billing")?;
//! ```

pub mod builtin;
pub mod chain;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod handler;
pub mod middleware;
pub mod observer;
pub mod outcome;
pub mod publisher;
pub mod route;
pub mod router;

pub use builtin::{Guard, LoggingMiddleware};
pub use chain::MiddlewareChain;
pub use dispatcher::{Disposition, DispositionReason, Dispatcher, RetryPolicy};
pub use error::{ExtractError, ExtractResult, PublishError};
pub use extractor::{FromInbound, Json, Metadata, Payload, RouteKey, State};
pub use handler::{BoxedHandler, ErasedHandler, Handler, HandlerFn, IntoHandlerResult, into_handler};
pub use middleware::{BoxedMiddleware, Flow, Middleware, Recovery};
pub use observer::{BoxedObserver, DispatchEvent, DispatchObserver, TracingObserver};
pub use outcome::{Failure, Origin, Outcome};
pub use publisher::{DeliveryResult, MAX_PRIORITY, PublishOptions, PublishReport, Publisher};
pub use route::{Binding, Destination, MiddlewareRef, RouteTable};
pub use router::Router;
