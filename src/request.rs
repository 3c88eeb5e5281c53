//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method};

use crate::entity::{Body, FromBody, decode_as};
use crate::error::Error;
use crate::exchange::Exchange;
use crate::middleware::{ReadContext, Stack};

/// An incoming HTTP request, as handed to a handler.
///
/// The body is not read until the handler asks for it with
/// [`entity`](Request::entity); reading runs the middleware read chain.
pub struct Request {
    exchange: Arc<Exchange>,
    params: HashMap<String, String>,
    body: Option<Body>,
    middleware: Stack,
}

impl Request {
    pub(crate) fn new(
        exchange: Arc<Exchange>,
        params: HashMap<String, String>,
        body: Body,
        middleware: Stack,
    ) -> Self {
        Self { exchange, params, body: Some(body), middleware }
    }

    pub fn method(&self) -> &Method { self.exchange.method() }
    pub fn path(&self) -> &str { self.exchange.path() }
    pub fn headers(&self) -> &HeaderMap { self.exchange.headers() }
    pub fn remote_addr(&self) -> SocketAddr { self.exchange.remote_addr() }
    pub fn exchange(&self) -> &Exchange { &self.exchange }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.exchange.header(name)
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/legumes/{name}`, `req.param("name")` on `/legumes/pea`
    /// returns `Some("pea")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Reads the whole body and decodes it as `T`.
    ///
    /// The body can be read once; a second call returns
    /// [`Error::BodyConsumed`]. Reader errors are returned unchanged.
    pub async fn entity<T: FromBody>(&mut self) -> Result<T, Error> {
        let body = self.body.take().ok_or(Error::BodyConsumed)?;
        let cx = ReadContext::new(&self.exchange, body, &self.middleware, decode_as::<T>);
        cx.proceed()
            .await?
            .downcast::<T>()
            .ok_or_else(|| Error::Entity("read chain produced an entity of another type".into()))
    }

    /// Reads the whole body as raw bytes.
    pub async fn bytes(&mut self) -> Result<Bytes, Error> {
        self.entity::<Bytes>().await
    }
}
