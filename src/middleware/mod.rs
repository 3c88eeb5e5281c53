//! Middleware layer.
//!
//! Middleware intercepts an exchange at four points:
//!
//! ```text
//! before_dispatch ─► handler ─┬─► after_dispatch ─► around_write ─► transport
//!                             │
//!                             └─ around_read (when the handler reads its entity)
//! ```
//!
//! `around_read` and `around_write` wrap the framework's body reader and body
//! writer. Call [`ReadContext::proceed`] / [`WriteContext::proceed`] to run
//! the rest of the chain; what you do before and after is yours. Middleware
//! run in the order they were added to the [`Router`](crate::Router).
//!
//! [`on_finish`](Middleware::on_finish) fires exactly once per exchange, even
//! when the exchange future is dropped before completing.

use std::future::Future;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Arc;

use http_body_util::BodyExt;
use tracing::error;

use crate::entity::{self, Body, Decoded, Entity};
use crate::error::Error;
use crate::exchange::Exchange;
use crate::response::Response;

mod exchange_log;

pub use exchange_log::{ExchangeLogger, HANDLER_CLASS, HANDLER_METHOD, REQUEST_CONTENT_TYPE};

/// A heap-allocated, type-erased future borrowed for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The ordered middleware of one router.
pub(crate) type Stack = Arc<[Arc<dyn Middleware>]>;

/// A cross-cutting interceptor attached to every exchange of a router.
///
/// Every hook has a pass-through default; implement only what you need.
pub trait Middleware: Send + Sync + 'static {
    /// Runs after routing, before the handler.
    fn before_dispatch(&self, _exchange: &Exchange) {}

    /// Runs after the handler returned, before the body is serialized.
    /// `response.writes_body(..)` tells whether `around_write` will run.
    fn after_dispatch(&self, _exchange: &Exchange, _response: &Response) {}

    /// Wraps decoding of the request body.
    fn around_read<'a>(&'a self, cx: ReadContext<'a>) -> BoxFuture<'a, Result<Decoded, Error>> {
        cx.proceed()
    }

    /// Wraps serialization of the response entity into the transport body.
    fn around_write(&self, cx: WriteContext<'_>) -> io::Result<()> {
        cx.proceed()
    }

    /// Runs once when the exchange ends, however it ends.
    fn on_finish(&self, _exchange: &Exchange) {}
}

// ── Read chain ────────────────────────────────────────────────────────────────

/// The request body on its way to the body reader.
pub struct ReadContext<'a> {
    exchange: &'a Exchange,
    body: Body,
    next: &'a [Arc<dyn Middleware>],
    decode: fn(bytes::Bytes) -> Result<Decoded, Error>,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(
        exchange: &'a Exchange,
        body: Body,
        next: &'a [Arc<dyn Middleware>],
        decode: fn(bytes::Bytes) -> Result<Decoded, Error>,
    ) -> Self {
        Self { exchange, body, next, decode }
    }

    pub fn exchange(&self) -> &'a Exchange {
        self.exchange
    }

    /// Takes the body out, leaving an empty one in its place.
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, entity::empty())
    }

    /// Substitutes the body the rest of the chain will read.
    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    /// Runs the next middleware, or the body reader at the end of the chain.
    pub fn proceed(self) -> BoxFuture<'a, Result<Decoded, Error>> {
        let next = self.next;
        match next.split_first() {
            Some((middleware, rest)) => middleware.around_read(ReadContext { next: rest, ..self }),
            None => Box::pin(async move {
                let bytes = self.body.collect().await.map_err(Error::Body)?.to_bytes();
                (self.decode)(bytes)
            }),
        }
    }
}

// ── Write chain ───────────────────────────────────────────────────────────────

/// The response entity on its way to the transport sink.
pub struct WriteContext<'a> {
    exchange: &'a Exchange,
    entity: &'a dyn Entity,
    output: &'a mut dyn Write,
    next: &'a [Arc<dyn Middleware>],
}

impl<'a> WriteContext<'a> {
    pub(crate) fn new(
        exchange: &'a Exchange,
        entity: &'a dyn Entity,
        output: &'a mut dyn Write,
        next: &'a [Arc<dyn Middleware>],
    ) -> Self {
        Self { exchange, entity, output, next }
    }

    pub fn exchange(&self) -> &'a Exchange {
        self.exchange
    }

    pub fn entity(&self) -> &'a dyn Entity {
        self.entity
    }

    /// The sink the rest of the chain writes to.
    pub fn output(&mut self) -> &mut dyn Write {
        &mut *self.output
    }

    /// Runs the next middleware, or the entity writer at the end of the chain.
    pub fn proceed(self) -> io::Result<()> {
        let next = self.next;
        match next.split_first() {
            Some((middleware, rest)) => middleware.around_write(WriteContext { next: rest, ..self }),
            None => self.entity.write_to(self.output).inspect_err(|e| {
                error!(error = %e, "failed to write response entity");
            }),
        }
    }

    /// Runs the rest of the chain against `output` instead of this
    /// context's sink, which stays untouched and usable afterwards.
    pub fn proceed_to(&mut self, output: &mut dyn Write) -> io::Result<()> {
        WriteContext {
            exchange: self.exchange,
            entity: self.entity,
            output,
            next: self.next,
        }
        .proceed()
    }
}
