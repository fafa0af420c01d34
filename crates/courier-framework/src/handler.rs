//! Handler system for the Courier framework.
//!
//! Terminal handlers are plain async functions. Their parameters are
//! extracted from the delivery via [`FromInbound`] and their return value is
//! turned into a chain result via [`IntoHandlerResult`], similar to Axum's
//! handler system.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_framework::{Json, Metadata, ProcessingError};
//!
//! // Simple handler with no parameters
//! async fn ping() {}
//!
//! // Handler with extractors and a fallible body
//! async fn on_created(
//!     Json(order): Json<OrderCreated>,
//!     meta: Metadata,
//! ) -> Result<(), ProcessingError> {
//!     inventory::reserve(order.id)
//!         .await
//!         .map_err(|e| ProcessingError::retryable(e.to_string()))
//! }
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use courier_core::{BoxFuture, Context, Inbound, ProcessingError, ProcessingResult};

use crate::extractor::FromInbound;

// ============================================================================
// Return values
// ============================================================================

/// Converts a handler's return value into a chain result.
pub trait IntoHandlerResult {
    /// Performs the conversion.
    fn into_handler_result(self) -> ProcessingResult<()>;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> ProcessingResult<()> {
        Ok(())
    }
}

impl<E> IntoHandlerResult for Result<(), E>
where
    E: Into<ProcessingError>,
{
    fn into_handler_result(self) -> ProcessingResult<()> {
        self.map_err(Into::into)
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// The core trait for terminal handlers.
///
/// # Blanket Implementation
///
/// This trait is automatically implemented for async functions that:
/// - Take 0-8 parameters that implement [`FromInbound`]
/// - Return `()` or `Result<(), E>` where `E: Into<ProcessingError>`
pub trait Handler<T>: Clone + Send + Sync + 'static {
    /// The type of future calling this handler returns.
    type Future: Future<Output = ProcessingResult<()>> + Send + 'static;

    /// Extracts the parameters and calls the handler.
    fn call(self, ctx: &Context, msg: &Inbound) -> Self::Future;
}

/// A wrapper that converts a function into a boxed handler.
pub struct HandlerFn<F, T> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> HandlerFn<F, T> {
    /// Creates a new handler function wrapper.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

/// Type-erased handler trait for dynamic dispatch.
pub trait ErasedHandler: Send + Sync {
    /// Executes the handler against one delivery.
    fn call(&self, ctx: &Context, msg: &Inbound) -> BoxFuture<'static, ProcessingResult<()>>;
}

impl<F, T> ErasedHandler for HandlerFn<F, T>
where
    F: Handler<T>,
    T: 'static,
{
    fn call(&self, ctx: &Context, msg: &Inbound) -> BoxFuture<'static, ProcessingResult<()>> {
        Box::pin(Handler::call(self.f.clone(), ctx, msg))
    }
}

/// A type-erased handler that can be stored in a chain.
pub type BoxedHandler = Arc<dyn ErasedHandler>;

/// Converts a handler function into a boxed handler.
pub fn into_handler<F, T>(f: F) -> BoxedHandler
where
    F: Handler<T>,
    T: 'static,
{
    Arc::new(HandlerFn::new(f))
}

// ============================================================================
// Handler implementations for functions (Axum-style)
// ============================================================================

impl<F, Fut, R> Handler<()> for F
where
    F: FnOnce() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoHandlerResult,
{
    type Future = BoxFuture<'static, ProcessingResult<()>>;

    fn call(self, _ctx: &Context, _msg: &Inbound) -> Self::Future {
        Box::pin(async move { (self)().await.into_handler_result() })
    }
}

/// Generates Handler implementations for functions with different arities.
macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case)]
        impl<F, Fut, R, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: IntoHandlerResult,
            $( $ty: FromInbound + Send + 'static, )*
        {
            type Future = BoxFuture<'static, ProcessingResult<()>>;

            fn call(self, ctx: &Context, msg: &Inbound) -> Self::Future {
                $(
                    let $ty = match $ty::from_inbound(ctx, msg) {
                        Ok(value) => value,
                        Err(e) => {
                            return Box::pin(std::future::ready(Err(ProcessingError::from(e))));
                        }
                    };
                )*

                Box::pin(async move { (self)($($ty,)*).await.into_handler_result() })
            }
        }
    };
}

impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
