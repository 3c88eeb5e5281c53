//! # tapline
//!
//! A minimal HTTP framework whose one job beyond routing is to let you see
//! every exchange: method, path, peer, the handler that served it, and the
//! raw bytes of both bodies, without the handler or the client noticing.
//!
//! ## The pieces
//!
//! - Radix-tree routing — O(path-length) lookup via [`matchit`]
//! - Async I/O — tokio + hyper, HTTP/1.1 and HTTP/2
//! - Graceful shutdown — SIGTERM / Ctrl-C, drains in-flight requests
//! - [`Middleware`] — four hooks around each exchange: before and after the
//!   handler, and around reading and writing the body
//! - [`ExchangeLogger`] — the middleware that taps both bodies and tags every
//!   log line with the handler that served the exchange
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tapline::{ExchangeLogger, Method, Request, Response, Router, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tapline::Error> {
//!     let app = Router::new()
//!         .on(Method::GET,  "/legumes/{name}", get_legume)
//!         .on(Method::POST, "/legumes",        add_legume)
//!         .layer(ExchangeLogger::new());
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! async fn get_legume(req: Request) -> Response {
//!     let name = req.param("name").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"name":"{name}"}}"#).into_bytes())
//! }
//!
//! async fn add_legume(mut req: Request) -> Result<Response, tapline::Error> {
//!     // Runs the read chain; the logger sees the bytes first.
//!     let body = req.entity::<String>().await?;
//!     if body.is_empty() {
//!         return Ok(Response::status(StatusCode::BAD_REQUEST));
//!     }
//!     Ok(Response::builder().status(StatusCode::CREATED).json(body.into_bytes()))
//! }
//! ```
//!
//! tapline never serializes your domain types. Bring a `Json<T>` that
//! implements [`FromBody`] and [`Entity`] with the serializer of your choice.

mod entity;
mod error;
mod exchange;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use entity::{Body, Decoded, Entity, FromBody, empty, full};
pub use error::{BoxError, Error};
pub use exchange::{Exchange, HandlerId, Metadata};
pub use handler::Handler;
pub use http::{Method, StatusCode};
pub use middleware::{ExchangeLogger, Middleware};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
