//! Legume service with every exchange logged, bodies included.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example legumes
//!
//! Try:
//!   curl http://localhost:3000/legumes
//!   curl -X POST http://localhost:3000/legumes \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"pea","description":"green"}'
//!   curl -X DELETE http://localhost:3000/legumes/pea

use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tapline::{
    BoxError, Entity, ExchangeLogger, FromBody, Method, Request, Response, Router, Server,
    StatusCode,
};

#[tokio::main]
async fn main() -> Result<(), tapline::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let app = Router::new()
        .on(Method::GET,    "/legumes",        LegumeResource::list)
        .on(Method::POST,   "/legumes",        LegumeResource::add)
        .on(Method::DELETE, "/legumes/{name}", LegumeResource::delete)
        .layer(ExchangeLogger::new().max_body_len(4096));

    Server::bind("0.0.0.0:3000")?.serve(app).await
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct Legume {
    name: String,
    description: String,
}

static LEGUMES: Mutex<Vec<Legume>> = Mutex::new(Vec::new());

fn legumes() -> std::sync::MutexGuard<'static, Vec<Legume>> {
    LEGUMES.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LegumeResource;

impl LegumeResource {
    // GET /legumes
    async fn list(_req: Request) -> Response {
        Response::entity(Json(legumes().clone()))
    }

    // POST /legumes → the updated list
    async fn add(mut req: Request) -> Result<Response, tapline::Error> {
        let Json(legume) = req.entity::<Json<Legume>>().await?;
        tracing::debug!(legume = %legume.name, "adding legume");
        let mut all = legumes();
        all.push(legume);
        Ok(Response::entity(Json(all.clone())))
    }

    // DELETE /legumes/{name} → 204 No Content, nothing for the writer to tap
    async fn delete(req: Request) -> StatusCode {
        let name = req.param("name").unwrap_or_default();
        legumes().retain(|l| l.name != name);
        StatusCode::NO_CONTENT
    }
}

/// JSON in both directions, via serde.
#[derive(Debug)]
struct Json<T>(T);

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
