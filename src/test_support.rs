//! Builders for unit tests that need a live `Context`.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde_json::Value;

use crate::app::Shared;
use crate::config::Config;
use crate::context::Context;
use crate::middleware::MiddlewareRegistry;
use crate::request::Request;

pub(crate) fn shared() -> Arc<Shared> {
    shared_with(|_| {})
}

pub(crate) fn shared_with(configure: impl FnOnce(&mut Config)) -> Arc<Shared> {
    let mut config = Config::default();
    config.session.secret = "test-secret".to_owned();
    configure(&mut config);
    Arc::new(Shared::new(config, MiddlewareRegistry::new(), None).unwrap())
}

pub(crate) fn context(shared: &Arc<Shared>, method: &str, uri: &str) -> Context {
    let req = http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Bytes::new())
        .unwrap();
    context_with(shared, req, Vec::new())
}

pub(crate) fn context_with(
    shared: &Arc<Shared>,
    req: http::Request<Bytes>,
    path_params: Vec<(String, String)>,
) -> Context {
    Context::new(Arc::clone(shared), Request::new(req), None, path_params)
}

pub(crate) async fn read_json(res: http::Response<Full<Bytes>>) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
