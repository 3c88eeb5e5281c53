//! Unified error type.

use std::fmt;
use std::net::AddrParseError;

/// A boxed, thread-safe error, as produced by body streams and body readers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type returned by tapline's fallible operations.
///
/// Infrastructure failures (binding, accepting) surface from
/// [`Server::serve`](crate::Server::serve). Request-level failures (a body
/// the reader rejects, a body read twice) surface from
/// [`Request::entity`](crate::Request::entity) and turn into HTTP responses
/// through [`IntoResponse`](crate::IntoResponse).
#[derive(Debug)]
pub enum Error {
    /// Socket-level failure.
    Io(std::io::Error),
    /// The address given to [`Server::bind`](crate::Server::bind) does not parse.
    Addr(AddrParseError),
    /// The transport failed while the request body was being read.
    Body(BoxError),
    /// The body reader rejected the request bytes.
    Entity(BoxError),
    /// The request body was already read by an earlier call.
    BodyConsumed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e)       => write!(f, "io: {e}"),
            Self::Addr(e)     => write!(f, "invalid address: {e}"),
            Self::Body(e)     => write!(f, "request body: {e}"),
            Self::Entity(e)   => write!(f, "invalid request entity: {e}"),
            Self::BodyConsumed => f.write_str("request body already consumed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Addr(e) => Some(e),
            Self::Body(e) | Self::Entity(e) => Some(e.as_ref()),
            Self::BodyConsumed => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<AddrParseError> for Error {
    fn from(e: AddrParseError) -> Self {
        Self::Addr(e)
    }
}
