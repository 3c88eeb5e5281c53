//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! A handler returns a [`Response`] holding an *entity*: the response object
//! before serialization. The framework serializes it after the middleware
//! `after_dispatch` hooks have seen it, through the `around_write` chain.

use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, StatusCode};
use http_body_util::Full;
use tracing::error;

use crate::entity::{Entity, Raw};
use crate::error::Error;
use crate::exchange::Exchange;
use crate::middleware::{Middleware, WriteContext};

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use tapline::{Response, StatusCode};
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use tapline::{Response, StatusCode};
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/legumes/42")
///     .json(br#"{"id":42}"#.to_vec());
///
/// Response::builder()
///     .bytes("application/xml", b"<ok/>".to_vec());
/// ```
pub struct Response {
    entity: Option<Box<dyn Entity>>,
    headers: Vec<(String, String)>,
    status: StatusCode,
}

impl Response {
    /// `200 OK` — `application/json`, from bytes your serializer produced.
    pub fn json(body: Vec<u8>) -> Self {
        Self::entity(Raw { content_type: "application/json", bytes: body.into() })
    }

    /// `200 OK` — `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::entity(body)
    }

    /// `200 OK` with an entity serialized later, by the write chain.
    pub fn entity(entity: impl Entity) -> Self {
        Self { entity: Some(Box::new(entity)), headers: Vec::new(), status: StatusCode::OK }
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { entity: None, headers: Vec::new(), status: code }
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }

    /// The response object, before serialization.
    pub fn body(&self) -> Option<&dyn Entity> {
        self.entity.as_deref()
    }

    /// Whether the framework will serialize a body for this response to a
    /// `method` request. When `false`, `around_write` does not run.
    pub fn writes_body(&self, method: &Method) -> bool {
        self.entity.is_some()
            && *method != Method::HEAD
            && !self.status.is_informational()
            && self.status != StatusCode::NO_CONTENT
            && self.status != StatusCode::NOT_MODIFIED
    }

    /// Serializes the entity through the write chain and assembles the
    /// transport response.
    pub(crate) fn into_http(
        self,
        exchange: &Exchange,
        middleware: &[Arc<dyn Middleware>],
    ) -> http::Response<Full<Bytes>> {
        let entity = if self.writes_body(exchange.method()) { self.entity.as_deref() } else { None };

        let mut body = Vec::new();
        if let Some(entity) = entity {
            // The failure itself is logged where the entity is written.
            if WriteContext::new(exchange, entity, &mut body, middleware).proceed().is_err() {
                return plain(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }

        let mut builder = http::Response::builder().status(self.status);
        let has_content_type = self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
        if !has_content_type {
            if let Some(content_type) = entity.and_then(|e| e.content_type()) {
                builder = builder.header(CONTENT_TYPE, content_type);
            }
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder.body(Full::new(Bytes::from(body))).unwrap_or_else(|e| {
            error!(error = %e, "invalid response head");
            plain(StatusCode::INTERNAL_SERVER_ERROR)
        })
    }
}

/// A bodiless transport response, for answers produced outside any handler.
pub(crate) fn plain(status: StatusCode) -> http::Response<Full<Bytes>> {
    let mut res = http::Response::new(Full::new(Bytes::new()));
    *res.status_mut() = status;
    res
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method — you always know what you're sending.
pub struct ResponseBuilder {
    headers: Vec<(String, String)>,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: Vec<u8>) -> Response {
        self.entity(Raw { content_type: "application/json", bytes: body.into() })
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        let body: String = body.into();
        self.entity(body)
    }

    /// Terminate with pre-serialized bytes of any content type.
    pub fn bytes(self, content_type: &'static str, body: Vec<u8>) -> Response {
        self.entity(Raw { content_type, bytes: body.into() })
    }

    /// Terminate with an entity that serializes itself.
    pub fn entity(self, entity: impl Entity) -> Response {
        Response { entity: Some(Box::new(entity)), headers: self.headers, status: self.status }
    }

    /// Terminate with no body (e.g. `204 No Content`, `301 Moved Permanently`).
    pub fn no_body(self) -> Response {
        Response { entity: None, headers: self.headers, status: self.status }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a [`StatusCode`] directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

/// Handlers can use `?`: both arms become responses.
impl<T: IntoResponse, E: IntoResponse> IntoResponse for Result<T, E> {
    fn into_response(self) -> Response {
        match self {
            Ok(value) => value.into_response(),
            Err(err) => err.into_response(),
        }
    }
}

/// A body the reader rejects is the client's fault; anything else is ours.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Error::Body(_) | Error::Entity(_) => StatusCode::BAD_REQUEST,
            Error::Io(_) | Error::Addr(_) | Error::BodyConsumed => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Response::builder().status(status).text(self.to_string())
    }
}
