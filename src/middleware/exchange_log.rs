//! Exchange logger: logs every request and response, bodies included.
//!
//! Per exchange the output reads, in order:
//!
//! ```text
//! request filter: POST /legumes from 127.0.0.1:50312
//! reader interceptor before: {"name":"pea","description":"green"}
//! reader interceptor after: Json(Legume { name: "pea", description: "green" })
//! response filter: Json([Legume { name: "pea", description: "green" }])
//! writer interceptor before: Json([Legume { name: "pea", description: "green" }])
//! writer interceptor after: [{"name":"pea","description":"green"}]
//! ```
//!
//! The logger stores `handler-class`, `handler-method` and
//! `request-content-type` in the exchange's [`Metadata`], which puts them on
//! every line logged while serving the exchange, handler lines included. The
//! keys are removed exactly once: by the response filter when no body will be
//! written, otherwise by the writer interceptor once the body has reached the
//! sink.
//!
//! [`Metadata`]: crate::Metadata
//!
//! Bodies are buffered in full. The handler reads, and the client receives,
//! exactly the bytes they would have without the logger.

use std::borrow::Cow;
use std::io;

use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use tracing::{debug, info, warn};

use crate::entity::{self, Decoded, Entity};
use crate::error::Error;
use crate::exchange::Exchange;
use crate::middleware::{BoxFuture, Middleware, ReadContext, WriteContext};
use crate::response::Response;

pub const HANDLER_CLASS: &str = "handler-class";
pub const HANDLER_METHOD: &str = "handler-method";
pub const REQUEST_CONTENT_TYPE: &str = "request-content-type";

const CONTEXT_KEYS: [&str; 3] = [HANDLER_CLASS, HANDLER_METHOD, REQUEST_CONTENT_TYPE];

/// Logs method, path, peer, handler and both bodies of every exchange.
///
/// ```rust,no_run
/// use tapline::{ExchangeLogger, Router};
///
/// let app = Router::new().layer(ExchangeLogger::new().max_body_len(4096));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ExchangeLogger {
    max_body_len: Option<usize>,
}

impl ExchangeLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps how many bytes of decoded body text go into a log line.
    /// The bytes forwarded to the handler and the client are never cut.
    pub fn max_body_len(mut self, len: usize) -> Self {
        self.max_body_len = Some(len);
        self
    }

    /// Body bytes as loggable text. Invalid UTF-8 is logged lossily, with a
    /// warning, and never fails the exchange.
    fn render<'b>(&self, bytes: &'b [u8], side: &'static str) -> Cow<'b, str> {
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => Cow::Borrowed(text),
            Err(e) => {
                warn!(
                    side,
                    valid_up_to = e.valid_up_to(),
                    "{side} body is not valid UTF-8, logging lossy text"
                );
                String::from_utf8_lossy(bytes)
            }
        };
        match self.max_body_len {
            Some(max) if text.len() > max => {
                let cut = floor_char_boundary(&text, max);
                Cow::Owned(format!("{}... ({} bytes)", &text[..cut], bytes.len()))
            }
            _ => text,
        }
    }

    fn clear_context(&self, exchange: &Exchange, from: &'static str) {
        let removed = exchange.metadata().clear(&CONTEXT_KEYS);
        debug!(from, removed, "context metadata cleared");
    }
}

impl Middleware for ExchangeLogger {
    fn before_dispatch(&self, exchange: &Exchange) {
        let meta = exchange.metadata();
        meta.insert(HANDLER_CLASS, exchange.handler().class());
        meta.insert(HANDLER_METHOD, exchange.handler().method());
        if let Some(content_type) = exchange.content_type() {
            meta.insert(REQUEST_CONTENT_TYPE, content_type);
        }

        // The router entered the context as it stood before this hook.
        let _context = meta.span().entered();
        info!(
            "request filter: {} {} from {}",
            exchange.method(),
            exchange.path(),
            exchange.remote_addr(),
        );
    }

    fn around_read<'a>(&'a self, mut cx: ReadContext<'a>) -> BoxFuture<'a, Result<Decoded, Error>> {
        Box::pin(async move {
            let buffered = drain(cx.take_body()).await;
            cx.set_body(entity::full(buffered.clone()));

            info!("reader interceptor before: {}", self.render(&buffered, "request"));
            let decoded = cx.proceed().await?;
            info!("reader interceptor after: {decoded:?}");
            Ok(decoded)
        })
    }

    fn after_dispatch(&self, exchange: &Exchange, response: &Response) {
        info!("response filter: {}", DisplayEntity(response.body()));

        // The writer interceptor clears the context after writing; nothing
        // will be written here, so this is the last chance.
        if !response.writes_body(exchange.method()) {
            self.clear_context(exchange, "response filter");
        }
    }

    fn around_write(&self, mut cx: WriteContext<'_>) -> io::Result<()> {
        let exchange = cx.exchange();
        let written = self.tee_write(&mut cx);
        self.clear_context(exchange, "writer interceptor");
        written
    }

    fn on_finish(&self, exchange: &Exchange) {
        if exchange.metadata().cleanups() == 0 {
            warn!("exchange ended before its context was cleared");
            self.clear_context(exchange, "exchange end");
        }
    }
}

impl ExchangeLogger {
    fn tee_write(&self, cx: &mut WriteContext<'_>) -> io::Result<()> {
        info!("writer interceptor before: {:?}", cx.entity());

        let mut buffer = Vec::new();
        cx.proceed_to(&mut buffer)?;
        info!("writer interceptor after: {}", self.render(&buffer, "response"));

        cx.output().write_all(&buffer)
    }
}

/// Reads `body` to the end. A transport error stops the copy; whatever
/// arrived before it is kept.
async fn drain(mut body: entity::Body) -> Bytes {
    let mut buffer = BytesMut::new();
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Ok(data) = frame.into_data() {
                    buffer.extend_from_slice(&data);
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    captured = buffer.len(),
                    "problem while copying the request buffer"
                );
                break;
            }
        }
    }
    buffer.freeze()
}

/// `None` prints as nothing.
struct DisplayEntity<'a>(Option<&'a dyn Entity>);

impl std::fmt::Display for DisplayEntity<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(entity) => write!(f, "{entity:?}"),
            None => Ok(()),
        }
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    (0..=index.min(text.len()))
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0)
}
