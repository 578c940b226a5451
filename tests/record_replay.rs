//! Record/replay round trips against a real HTTP origin

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::net::TcpListener;

use replay_engine::interception::RequestDescriptor;
use replay_engine::{EngineConfig, Mocks, RequestOptions, TransformConfig};

/// Origin server answering JSON and counting the requests it sees
async fn start_origin() -> anyhow::Result<(SocketAddr, Arc<AtomicUsize>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let counter = Arc::clone(&counter);
                    async move { handle(req, counter).await }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    Ok((addr, hits))
}

async fn handle(
    req: Request<Incoming>,
    counter: Arc<AtomicUsize>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let hit = counter.fetch_add(1, Ordering::SeqCst) + 1;
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let body = req.into_body().collect().await?.to_bytes();

    let (status, payload) = if path == "/missing" {
        (404, json!({"error": "not found"}))
    } else {
        (
            200,
            json!({
                "method": method,
                "path": path,
                "body": String::from_utf8_lossy(&body),
                "hit": hit,
            }),
        )
    };

    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(payload.to_string())))
        .unwrap())
}

fn mocks(dir: &Path) -> Mocks {
    Mocks::from_config(EngineConfig::with_fixture_dir(dir)).unwrap()
}

fn fixture_path(mocks: &Mocks, descriptor: &RequestDescriptor) -> std::path::PathBuf {
    mocks
        .dispatcher()
        .store()
        .compute_fingerprint(descriptor, &TransformConfig::new())
        .unwrap()
        .path
}

#[tokio::test]
async fn records_once_then_replays_without_the_origin() -> anyhow::Result<()> {
    let (addr, hits) = start_origin().await?;
    let dir = tempdir()?;
    let mocks = mocks(dir.path());
    mocks.intercept("http://127.0.0.1", "/users/:id", TransformConfig::new())?;

    let url = format!("http://127.0.0.1:{}/users/7", addr.port());
    let mut bodies = Vec::new();
    for _ in 0..3 {
        let mut request = mocks.dispatcher().request_url(&url)?;
        assert!(request.is_intercepted());
        request.end();

        let response = request.response().await?;
        assert_eq!(response.status(), 200);
        bodies.push(response.json::<Value>().await?);
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(bodies[0]["hit"], 1);
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);

    let descriptor = RequestDescriptor::from_url(&url)?;
    let path = fixture_path(&mocks, &descriptor);
    assert!(path.starts_with(dir.path().join("get").join("http").join("127.0.0.1")));

    let recorded: Value = serde_json::from_slice(&std::fs::read(&path)?)?;
    assert_eq!(recorded["status"], 200);
    assert_eq!(recorded["statusText"], "OK");
    assert_eq!(recorded["data"]["path"], "/users/7");
    Ok(())
}

async fn post_item(mocks: &Mocks, port: u16, name: &str) -> anyhow::Result<Value> {
    let options = RequestOptions::new()
        .method("post")
        .hostname("127.0.0.1")
        .port(port)
        .path("/items")
        .header("Content-Type", "application/x-www-form-urlencoded");

    let mut request = mocks.dispatcher().http_request(options)?;
    request.write(format!("name={}", name));
    request.end();

    Ok(request.response().await?.json::<Value>().await?)
}

#[tokio::test]
async fn post_body_reaches_origin_and_selects_the_fixture() -> anyhow::Result<()> {
    let (addr, hits) = start_origin().await?;
    let dir = tempdir()?;
    let mocks = mocks(dir.path());
    mocks.intercept("http://127.0.0.1", "/items", TransformConfig::new())?;

    let tea = post_item(&mocks, addr.port(), "tea").await?;
    let coffee = post_item(&mocks, addr.port(), "coffee").await?;
    let tea_again = post_item(&mocks, addr.port(), "tea").await?;

    assert_eq!(tea["method"], "POST");
    assert_eq!(tea["body"], "name=tea");
    assert_eq!(coffee["body"], "name=coffee");
    assert_eq!(tea_again, tea);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn unmatched_routes_always_reach_the_origin() -> anyhow::Result<()> {
    let (addr, hits) = start_origin().await?;
    let dir = tempdir()?;
    let mocks = mocks(dir.path());
    mocks.intercept("http://127.0.0.1", "/users/:id", TransformConfig::new())?;

    let url = format!("http://127.0.0.1:{}/health", addr.port());
    for expected in 1..=2 {
        let mut request = mocks.dispatcher().request_url(&url)?;
        assert!(!request.is_intercepted());
        request.end();

        let body: Value = request.response().await?.json().await?;
        assert_eq!(body["hit"], expected);
    }

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(std::fs::read_dir(dir.path())?.next().is_none());
    Ok(())
}

#[tokio::test]
async fn not_found_is_recorded_and_replayed() -> anyhow::Result<()> {
    let (addr, hits) = start_origin().await?;
    let dir = tempdir()?;
    let mocks = mocks(dir.path());
    mocks.intercept("127.0.0.1", None::<&str>, TransformConfig::new())?;

    let url = format!("http://127.0.0.1:{}/missing", addr.port());
    for _ in 0..2 {
        let mut request = mocks.dispatcher().request_url(&url)?;
        request.end();
        let response = request.response().await?;
        assert_eq!(response.status(), 404);
        assert_eq!(response.head().status_text, "Not Found");
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn unreachable_origin_records_a_server_error() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let mocks = mocks(dir.path());
    mocks.intercept("http://127.0.0.1", None::<&str>, TransformConfig::new())?;

    let url = "http://127.0.0.1:1/down";
    let mut request = mocks.dispatcher().request_url(url)?;
    request.end();

    let response = request.response().await?;
    assert_eq!(response.status(), 500);
    assert_eq!(response.head().status_text, "Internal Server Error");

    let body: Value = response.json().await?;
    assert!(body.is_string());

    let path = fixture_path(&mocks, &RequestDescriptor::from_url(url)?);
    let recorded: Value = serde_json::from_slice(&std::fs::read(path)?)?;
    assert_eq!(recorded["status"], 500);
    assert_eq!(recorded["headers"], json!({}));
    Ok(())
}
