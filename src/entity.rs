//! Request and response entities.
//!
//! tapline never looks inside a body. Handlers decide what the bytes mean:
//!
//! - on the way **in**, a type implementing [`FromBody`] turns the buffered
//!   request bytes into a value (`Bytes`, `String`, or your own `Json<T>`);
//! - on the way **out**, a type implementing [`Entity`] writes itself to the
//!   transport sink.
//!
//! Both directions run through the middleware chain, which is where the
//! exchange logger taps them.

use std::any::Any;
use std::fmt;
use std::io::{self, Write};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};

use crate::error::{BoxError, Error};

/// The request body stream as seen by the read chain.
pub type Body = UnsyncBoxBody<Bytes, BoxError>;

/// A body that yields `bytes` in a single frame.
pub fn full(bytes: impl Into<Bytes>) -> Body {
    Full::<Bytes>::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

/// A body with no frames.
pub fn empty() -> Body {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

// ── Response side ─────────────────────────────────────────────────────────────

/// A response object that knows how to serialize itself.
///
/// The `Debug` form is what gets logged before serialization, so keep it
/// readable.
///
/// ```rust,ignore
/// use std::io::{self, Write};
/// use tapline::Entity;
///
/// #[derive(Debug)]
/// struct Json<T>(T);
///
/// impl<T: serde::Serialize + std::fmt::Debug + Send + Sync + 'static> Entity for Json<T> {
///     fn content_type(&self) -> Option<&str> { Some("application/json") }
///     fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
///         serde_json::to_writer(out, &self.0).map_err(io::Error::other)
///     }
/// }
/// ```
pub trait Entity: fmt::Debug + Send + Sync + 'static {
    /// Value for the `content-type` header, unless the response sets one.
    fn content_type(&self) -> Option<&str> {
        None
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()>;
}

impl Entity for String {
    fn content_type(&self) -> Option<&str> {
        Some("text/plain; charset=utf-8")
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self.as_bytes())
    }
}

impl Entity for Bytes {
    fn content_type(&self) -> Option<&str> {
        Some("application/octet-stream")
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self)
    }
}

/// Pre-serialized bytes with an explicit content type.
///
/// Built by [`Response::json`](crate::Response::json) and the typed
/// terminators of [`ResponseBuilder`](crate::ResponseBuilder).
pub(crate) struct Raw {
    pub(crate) content_type: &'static str,
    pub(crate) bytes: Bytes,
}

impl fmt::Debug for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

impl Entity for Raw {
    fn content_type(&self) -> Option<&str> {
        Some(self.content_type)
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&self.bytes)
    }
}

// ── Request side ──────────────────────────────────────────────────────────────

/// A value decoded from the fully buffered request body.
///
/// The `Debug` form is what the exchange logger prints after decoding.
pub trait FromBody: fmt::Debug + Send + Sized + 'static {
    fn from_body(bytes: Bytes) -> Result<Self, BoxError>;
}

impl FromBody for Bytes {
    fn from_body(bytes: Bytes) -> Result<Self, BoxError> {
        Ok(bytes)
    }
}

impl FromBody for String {
    fn from_body(bytes: Bytes) -> Result<Self, BoxError> {
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

/// The type-erased result of the read chain.
///
/// Middleware sees it as something printable; [`Request::entity`] downcasts
/// it back to the type the handler asked for.
///
/// [`Request::entity`]: crate::Request::entity
pub struct Decoded(Box<dyn DebugAny>);

trait DebugAny: Any + fmt::Debug + Send {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Any + fmt::Debug + Send> DebugAny for T {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl Decoded {
    pub fn new<T: FromBody>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Returns the value if it is a `T`.
    pub fn downcast<T: FromBody>(self) -> Option<T> {
        <dyn DebugAny>::into_any(self.0).downcast::<T>().ok().map(|b| *b)
    }
}

impl fmt::Debug for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// Terminal step of the read chain for a concrete `T`.
pub(crate) fn decode_as<T: FromBody>(bytes: Bytes) -> Result<Decoded, Error> {
    T::from_body(bytes).map(Decoded::new).map_err(Error::Entity)
}
