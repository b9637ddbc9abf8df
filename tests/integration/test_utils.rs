//! Shared helpers for the integration tests.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE, HeaderValue, SET_COOKIE};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;

use torii::Config;

pub fn config() -> Config {
    let mut config = Config::default();
    config.session.secret = "integration-secret".to_owned();
    config
}

pub fn request(method: &str, uri: &str) -> http::Request<Bytes> {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Bytes::new())
        .unwrap()
}

pub fn with_cookie(mut req: http::Request<Bytes>, cookie: &str) -> http::Request<Bytes> {
    req.headers_mut().insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
    req
}

/// `name=value` part of the response's session cookie, ready to send back.
pub fn session_cookie(res: &http::Response<Full<Bytes>>) -> Option<String> {
    res.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("_session="))
        .and_then(|v| v.split(';').next())
        .map(str::to_owned)
}

pub async fn body_json(res: http::Response<Full<Bytes>>) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// A throwaway OAuth provider answering every request with `status` and
/// `body`, recording `(path, json body)` of what it received.
pub struct Provider {
    pub endpoint: String,
    pub received: Arc<Mutex<Vec<(String, Value)>>>,
}

pub async fn spawn_provider(status: StatusCode, body: Value) -> Provider {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&received);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = Arc::clone(&seen);
            let body = body.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req: hyper::Request<Incoming>| {
                    let seen = Arc::clone(&seen);
                    let body = body.clone();
                    async move {
                        let path = req.uri().path().to_owned();
                        let bytes = req.into_body().collect().await.unwrap().to_bytes();
                        seen.lock().push((path, serde_json::from_slice(&bytes).unwrap_or(Value::Null)));

                        let mut res = http::Response::new(Full::new(Bytes::from(body.to_string())));
                        *res.status_mut() = status;
                        res.headers_mut()
                            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                        Ok::<_, Infallible>(res)
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });

    Provider { endpoint: format!("http://{addr}"), received }
}
