mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{Capture, Witness, body_bytes, peer, request};
use http_body_util::Full;
use tapline::{ExchangeLogger, Method, Request, Response, Router};
use tokio::task::JoinSet;

struct Alpha;
struct Beta;

impl Alpha {
    async fn get(mut req: Request) -> Result<Response, tapline::Error> {
        let name = req.entity::<String>().await?;
        tokio::task::yield_now().await;
        tracing::info!("alpha handled {name}");
        Ok(Response::text(name))
    }
}

impl Beta {
    async fn get(mut req: Request) -> Result<Response, tapline::Error> {
        tokio::task::yield_now().await;
        let name = req.entity::<String>().await?;
        tracing::info!("beta handled {name}");
        Ok(Response::text(name))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exchanges_on_worker_threads_keep_their_own_context() {
    let logs = Capture::install_global();
    let witness = Witness::default();
    let router = Arc::new(
        Router::new()
            .on(Method::POST, "/alpha", Alpha::get)
            .on(Method::POST, "/beta", Beta::get)
            .layer(witness.clone())
            .layer(ExchangeLogger::new()),
    );

    let mut tasks = JoinSet::new();
    for i in 0..16 {
        let router = Arc::clone(&router);
        let (path, body): (&str, &'static str) = if i % 2 == 0 { ("/alpha", "alpha") } else { ("/beta", "beta") };
        tasks.spawn(async move {
            let req = request(Method::POST, path, Some("text/plain"), Full::new(Bytes::from_static(body.as_bytes())));
            let res = router.handle(req, peer()).await;
            assert_eq!(body_bytes(res).await, body);
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    let lines = logs.lines();
    for (path, own, other) in [("/alpha", "Alpha", "Beta"), ("/beta", "Beta", "Alpha")] {
        let span = format!("path={path}}}");
        let tagged: Vec<_> = lines.iter().filter(|l| l.contains(&span) && l.contains("meta=")).collect();
        assert!(tagged.iter().all(|l| l.contains(&format!("handler-class={own}")) && !l.contains(other)));
        assert_eq!(tagged.iter().filter(|l| l.contains("request filter")).count(), 8);
        assert_eq!(tagged.iter().filter(|l| l.contains(" handled ")).count(), 8);
    }

    let seen = witness.seen();
    assert_eq!(seen.len(), 16);
    for meta in &seen {
        assert!(meta.is_empty(), "context left behind: {meta}");
        assert_eq!(meta.cleanups(), 1);
    }
}
