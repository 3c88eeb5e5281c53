//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* types in one
//! `HashMap<Method, Tree>`, so each is hidden behind a trait object
//! (`dyn ErasedHandler`) and stored together with the [`HandlerId`] resolved
//! from its type path:
//!
//! ```text
//! async fn add(req: Request) -> Response { … }     ← user writes this
//!        ↓ router.on(Method::POST, "/legumes", LegumeResource::add)
//! add.into_route()                                 ← Handler blanket impl
//!        ↓
//! Route { handler: Arc::new(FnHandler(add)),       ← heap-allocated wrapper
//!         id: HandlerId { "LegumeResource", "add" } }
//!        ↓
//! handler.call(req)  at request time               ← one vtable dispatch
//! ```
//!
//! The identity is what the exchange logger reports as `handler-class` and
//! `handler-method`; it costs nothing per request.

use std::future::Future;
use std::sync::Arc;

use crate::exchange::HandlerId;
use crate::middleware::BoxFuture;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_route` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<'static, Response>;
}

/// A registered handler: the erased callable and who it is.
#[doc(hidden)]
#[derive(Clone)]
pub struct Route {
    pub(crate) handler: Arc<dyn ErasedHandler + Send + Sync + 'static>,
    pub(crate) id: HandlerId,
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_route(self) -> Route;
}

mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_route(self) -> Route {
        Route { handler: Arc::new(FnHandler(self)), id: HandlerId::of::<F>() }
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'static, Response> {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
