//! Server integration tests over real TCP connections.
//!
//! Tests verify:
//! - Requests reach the router with the peer address attached
//! - Unknown paths and methods are answered by the normalizer
//! - Oversized bodies are answered with 413 before any route runs
//! - The shutdown signal stops the server cleanly

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use http::StatusCode;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use torii::{App, BoxError, Context, Server, middleware};

use super::test_utils::config;

#[tokio::test]
async fn serves_until_signalled() {
    let mut app = App::new(config());
    app.middleware().register("logging", middleware::logging()).unwrap();
    let router = app
        .into_router()
        .unwrap()
        .use_middleware("logging")
        .get("/ip", |ctx: Context| async move {
            ctx.json(StatusCode::OK, &json!({ "ip": ctx.real_ip() }))?;
            Ok::<_, BoxError>(())
        });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(
        Server::bind("127.0.0.1:0")
            .with_grace(Duration::from_secs(2))
            .serve_listener(listener, router, async {
                let _ = stop_rx.await;
            }),
    );

    let client = reqwest::Client::new();

    let res = client.get(format!("{base}/ip")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "data": { "ip": "127.0.0.1" } }));

    let res = client.get(format!("{base}/missing")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "message": "Not Found" }));

    let res = client.post(format!("{base}/ip")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(res.headers()["allow"], "GET");

    drop(client);
    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    assert!(result.is_ok(), "server stopped with {result:?}");
}

#[tokio::test]
async fn oversized_bodies_are_refused_before_routing() {
    let reached = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&reached);
    let router = App::new(config()).into_router().unwrap().post("/upload", move |ctx: Context| {
        let flag = Arc::clone(&flag);
        async move {
            flag.store(true, Ordering::SeqCst);
            ctx.json(StatusCode::OK, &json!({ "len": ctx.body().len() }))?;
            Ok::<_, BoxError>(())
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(
        Server::bind("127.0.0.1:0")
            .with_body_limit(1024)
            .serve_listener(listener, router, async {
                let _ = stop_rx.await;
            }),
    );

    let client = reqwest::Client::new();

    let res = client.post(format!("{base}/upload")).body(vec![b'x'; 512]).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "data": { "len": 512 } }));
    reached.store(false, Ordering::SeqCst);

    let res = client.post(format!("{base}/upload")).body(vec![b'x'; 4096]).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "message": "Payload Too Large" }));
    assert!(!reached.load(Ordering::SeqCst));

    drop(client);
    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();
}
