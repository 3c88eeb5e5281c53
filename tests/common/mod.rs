//! Shared utilities for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Frame;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tapline::{
    BoxError, Entity, Exchange, ExchangeLogger, FromBody, Metadata, Method, Middleware, Request,
    Response, Router,
};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;

pub const PEER: &str = "127.0.0.1:50312";

pub fn peer() -> SocketAddr {
    PEER.parse().unwrap()
}

// ── Log capture ──────────────────────────────────────────────────────────────

/// In-memory sink for a `tracing_subscriber::fmt` subscriber.
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    /// Installs a DEBUG-level subscriber writing here, for the current thread.
    /// `#[tokio::test]` runs on one thread, spawned tasks included.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    /// Same as [`install`](Self::install), for every thread of the test
    /// binary. Call it at most once per binary.
    pub fn install_global() -> Self {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::set_global_default(subscriber).unwrap();
        capture
    }

    pub fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes).lines().map(str::to_owned).collect()
    }

    /// Index of the first line containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.lines().iter().position(|line| line.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines().iter().filter(|line| line.contains(needle)).count()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ── Witness middleware ───────────────────────────────────────────────────────

/// Keeps a handle on the metadata of every exchange it sees, so tests can
/// inspect it after the exchange is gone.
#[derive(Clone, Default)]
pub struct Witness(Arc<Mutex<Vec<Metadata>>>);

impl Witness {
    pub fn seen(&self) -> Vec<Metadata> {
        self.0.lock().unwrap().clone()
    }

    pub fn only(&self) -> Metadata {
        let seen = self.seen();
        assert_eq!(seen.len(), 1, "expected exactly one exchange");
        seen[0].clone()
    }
}

impl Middleware for Witness {
    fn before_dispatch(&self, exchange: &Exchange) {
        self.0.lock().unwrap().push(exchange.metadata().clone());
    }
}

// ── Bodies ───────────────────────────────────────────────────────────────────

/// A body delivered in several frames, optionally failing after them.
pub struct Chunked {
    chunks: VecDeque<Bytes>,
    fail_at_end: bool,
}

impl Chunked {
    pub fn new(chunks: &[&'static [u8]]) -> Self {
        Self { chunks: chunks.iter().map(|c| Bytes::from_static(c)).collect(), fail_at_end: false }
    }

    pub fn failing(chunks: &[&'static [u8]]) -> Self {
        Self { fail_at_end: true, ..Self::new(chunks) }
    }
}

impl hyper::body::Body for Chunked {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        match self.chunks.pop_front() {
            Some(chunk) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            None if self.fail_at_end => {
                self.fail_at_end = false;
                Poll::Ready(Some(Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))))
            }
            None => Poll::Ready(None),
        }
    }
}

/// A body that never yields a frame.
pub struct Stalled;

impl hyper::body::Body for Stalled {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        Poll::Pending
    }
}

pub fn request<B>(method: Method, path: &str, content_type: Option<&str>, body: B) -> http::Request<B> {
    let mut builder = http::Request::builder().method(method).uri(path);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    builder.body(body).unwrap()
}

pub fn json_request(method: Method, path: &str, body: &'static str) -> http::Request<Full<Bytes>> {
    request(method, path, Some("application/json"), Full::new(Bytes::from_static(body.as_bytes())))
}

pub fn empty_request(method: Method, path: &str) -> http::Request<Full<Bytes>> {
    request(method, path, None, Full::new(Bytes::new()))
}

pub async fn body_bytes(res: http::Response<Full<Bytes>>) -> Bytes {
    res.into_body().collect().await.unwrap().to_bytes()
}

// ── Legumes ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Legume {
    pub name: String,
    pub description: String,
}

/// JSON in both directions, via serde.
#[derive(Debug)]
pub struct Json<T>(pub T);

impl<T> FromBody for Json<T>
where
    T: DeserializeOwned + fmt::Debug + Send + 'static,
{
    fn from_body(bytes: Bytes) -> Result<Self, BoxError> {
        Ok(Json(serde_json::from_slice(&bytes)?))
    }
}

impl<T> Entity for Json<T>
where
    T: Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn content_type(&self) -> Option<&str> {
        Some("application/json")
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(out, &self.0).map_err(io::Error::other)
    }
}

/// An entity whose serializer always fails.
#[derive(Debug)]
pub struct Unwritable;

impl Entity for Unwritable {
    fn write_to(&self, _out: &mut dyn Write) -> io::Result<()> {
        Err(io::Error::other("serializer exploded"))
    }
}

pub struct LegumeResource;

impl LegumeResource {
    pub async fn list(_req: Request) -> Response {
        Response::entity(Json(vec![Legume {
            name: "carrot".into(),
            description: "root vegetable, usually orange".into(),
        }]))
    }

    pub async fn add(mut req: Request) -> Result<Response, tapline::Error> {
        let Json(legume) = req.entity::<Json<Legume>>().await?;
        Ok(Response::entity(Json(vec![legume])))
    }

    /// Echoes the raw request bytes.
    pub async fn echo(mut req: Request) -> Result<Response, tapline::Error> {
        let bytes = req.bytes().await?;
        Ok(Response::entity(bytes))
    }
}

/// The legume routes with the exchange logger and a witness attached.
pub fn legume_router(witness: &Witness) -> Router {
    Router::new()
        .on(Method::GET,  "/legumes",      LegumeResource::list)
        .on(Method::HEAD, "/legumes",      LegumeResource::list)
        .on(Method::POST, "/legumes",      LegumeResource::add)
        .on(Method::POST, "/legumes/echo", LegumeResource::echo)
        .layer(witness.clone())
        .layer(ExchangeLogger::new())
}
