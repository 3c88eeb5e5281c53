//! Radix-tree request router and the per-exchange pipeline.
//!
//! One tree per HTTP method. O(path-length) lookup. A matched request becomes
//! an [`Exchange`] and runs through the router's middleware:
//!
//! ```text
//! before_dispatch → handler → after_dispatch → around_write → on_finish
//! ```
//!
//! Every step runs inside the exchange's context span (see [`Metadata`]).

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use matchit::Router as MatchitRouter;
use tracing::{Instrument, debug, info_span};

use crate::entity::Body;
use crate::error::BoxError;
use crate::exchange::{Exchange, Metadata};
use crate::handler::{Handler, Route};
use crate::middleware::{Middleware, Stack};
use crate::request::Request;
use crate::response::plain;

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Each [`Router::on`] and [`Router::layer`] call returns `self` so
/// registrations chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Route>>,
    middleware: Stack,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), middleware: Vec::new().into() }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax — `req.param("name")` retrieves them:
    ///
    /// ```rust,no_run
    /// # use tapline::{Method, Request, Response, Router};
    /// # async fn list(_: Request) -> Response { Response::text("") }
    /// # async fn add(_: Request) -> Response { Response::text("") }
    /// # async fn get(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET,  "/legumes",        list)
    ///     .on(Method::POST, "/legumes",        add)
    ///     .on(Method::GET,  "/legumes/{name}", get);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_route())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Append a middleware. Hooks run in the order middleware were added.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        let mut stack = self.middleware.to_vec();
        stack.push(Arc::new(middleware));
        self.middleware = stack.into();
        self
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(Route, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let route = matched.value.clone();
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((route, params))
    }

    /// Serves one request in-process: routing, middleware, handler, and
    /// serialization. [`Server`](crate::Server) calls this for every request
    /// it reads off a connection.
    pub async fn handle<B>(&self, req: http::Request<B>, remote_addr: SocketAddr) -> http::Response<Full<Bytes>>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        let Some((route, params)) = self.lookup(&parts.method, parts.uri.path()) else {
            debug!(method = %parts.method, path = %parts.uri.path(), "no route");
            return plain(StatusCode::NOT_FOUND);
        };

        let span = info_span!("exchange", method = %parts.method, path = %parts.uri.path());
        let exchange = Arc::new(
            Exchange::new(parts.method, parts.uri.path(), remote_addr, route.id, parts.headers)
                .within(&span),
        );
        let body: Body = body.map_err(Into::into).boxed_unsync();

        self.run(route, exchange, params, body).instrument(span).await
    }

    async fn run(
        &self,
        route: Route,
        exchange: Arc<Exchange>,
        params: HashMap<String, String>,
        body: Body,
    ) -> http::Response<Full<Bytes>> {
        let _finish = FinishGuard { exchange: &exchange, middleware: &self.middleware };
        let context = exchange.metadata();

        for middleware in self.middleware.iter() {
            context.span().in_scope(|| middleware.before_dispatch(&exchange));
        }

        let request = Request::new(Arc::clone(&exchange), params, body, Arc::clone(&self.middleware));
        let response = InContext { inner: route.handler.call(request), context }.await;

        for middleware in self.middleware.iter() {
            context.span().in_scope(|| middleware.after_dispatch(&exchange, &response));
        }

        context.span().in_scope(|| response.into_http(&exchange, &self.middleware))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

/// Fires `on_finish` when the exchange ends: after the response is built, or
/// when the exchange future is dropped or unwinds part-way.
struct FinishGuard<'a> {
    exchange: &'a Exchange,
    middleware: &'a [Arc<dyn Middleware>],
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        let context = self.exchange.metadata();
        for middleware in self.middleware {
            context.span().in_scope(|| middleware.on_finish(self.exchange));
        }
    }
}

/// Polls `inner` inside the exchange's context span as it stands at each
/// poll, so handler events carry the metadata and stop carrying it once it
/// is cleared.
struct InContext<'a, F> {
    inner: F,
    context: &'a Metadata,
}

impl<F: Future + Unpin> Future for InContext<'_, F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let span = self.context.span();
        let _entered = span.enter();
        Pin::new(&mut self.inner).poll(cx)
    }
}
