//! Per-request context.
//!
//! A [`Context`] is created by the dispatcher for every matched request and
//! handed down the middleware chain by value. Clones are cheap handles onto the
//! same request state, which lets middleware pass it along or move it into
//! spawned work; it never outlives or crosses into another request.
//!
//! Interior state is behind `parking_lot` locks. Lock guards returned by
//! [`Context::session`] must be dropped before the next `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, LOCATION, SET_COOKIE};
use http::{StatusCode, Uri};
use http_body_util::Full;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::app::Shared;
use crate::auth::{AuthUser, Authentication};
use crate::bind::{self, BindError};
use crate::config::Config;
use crate::error::HttpError;
use crate::request::Request;
use crate::response::{ContentType, Envelope, Response};
use crate::router::RouteConfig;
use crate::session::Session;

// ── Params ────────────────────────────────────────────────────────────────────

/// Request parameters accumulated from path variables, then the query string,
/// then a form-encoded body. Values are appended, never overwritten, so a
/// single-value lookup returns the path variable when a key appears in
/// several places.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn extend_encoded(&mut self, encoded: &[u8]) {
        self.0.extend(
            url::form_urlencoded::parse(encoded).map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
    }
}

// ── Renderer ──────────────────────────────────────────────────────────────────

/// Template engine supplied by the application.
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, template: &str, data: &Map<String, Value>) -> Result<String, crate::BoxError>;
}

// ── Context ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    shared: Arc<Shared>,
    request: Request,
    route: Option<Arc<RouteConfig>>,
    params: Params,
    session: Mutex<Session>,
    data: RwLock<HashMap<String, Value>>,
    response: Mutex<Response>,
}

impl Context {
    pub(crate) fn new(
        shared: Arc<Shared>,
        request: Request,
        route: Option<Arc<RouteConfig>>,
        path_params: Vec<(String, String)>,
    ) -> Self {
        let mut params = Params(path_params);
        if let Some(query) = request.query() {
            params.extend_encoded(query.as_bytes());
        }
        let method = request.method();
        let has_form_body = (method == http::Method::POST || method == http::Method::PUT || method == http::Method::PATCH)
            && request.media_type().as_deref() == Some(mime::APPLICATION_WWW_FORM_URLENCODED.as_ref());
        if has_form_body {
            params.extend_encoded(request.body());
        }

        let mut data = HashMap::new();
        data.insert("current_path".to_owned(), Value::from(request.path()));
        data.insert("method".to_owned(), Value::from(request.method().as_str()));
        let current_route = route.as_ref().and_then(|r| r.name.clone());
        data.insert("current_route".to_owned(), current_route.map_or(Value::Null, Value::from));

        let session = Session::load(Arc::clone(&shared.sessions), request.headers());

        Self {
            inner: Arc::new(Inner {
                shared,
                request,
                route,
                params,
                session: Mutex::new(session),
                data: RwLock::new(data),
                response: Mutex::new(Response::default()),
            }),
        }
    }

    // ── Request ───────────────────────────────────────────────────────────────

    pub fn request(&self) -> &Request { &self.inner.request }
    pub fn method(&self) -> &http::Method { self.inner.request.method() }
    pub fn path(&self) -> &str { self.inner.request.path() }
    pub fn uri(&self) -> &Uri { self.inner.request.uri() }
    pub fn body(&self) -> &Bytes { self.inner.request.body() }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.request.header(name)
    }

    /// The matched route; `None` while answering an unmatched request.
    pub fn route(&self) -> Option<&RouteConfig> {
        self.inner.route.as_deref()
    }

    /// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then
    /// the connection's peer address.
    pub fn real_ip(&self) -> Option<String> {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            let first = forwarded.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return Some(first.to_owned());
            }
        }
        if let Some(real_ip) = self.header("x-real-ip") {
            return Some(real_ip.trim().to_owned());
        }
        self.inner.request.peer_addr().map(|addr| addr.ip().to_string())
    }

    // ── Params ────────────────────────────────────────────────────────────────

    pub fn param(&self, key: &str) -> Option<&str> {
        self.inner.params.get(key)
    }

    pub fn params(&self) -> &Params {
        &self.inner.params
    }

    /// Every value for `key`, path variable first.
    pub fn param_all<'a>(&'a self, key: &'a str) -> Vec<&'a str> {
        self.inner.params.get_all(key).collect()
    }

    /// Decodes the request body into `T`.
    ///
    /// `application/json` is decoded strictly; any other declared type is
    /// treated as form data. Without a `Content-Type` header nothing is bound
    /// and `Ok(None)` is returned.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<Option<T>, BindError> {
        let Some(media_type) = self.inner.request.media_type() else {
            return Ok(None);
        };
        let body = self.inner.request.body();
        if media_type == mime::APPLICATION_JSON.as_ref() {
            bind::json(body).map(Some)
        } else {
            bind::form(body).map(Some)
        }
    }

    // ── Scratch data ──────────────────────────────────────────────────────────

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.data.write().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.data.read().get(key).cloned()
    }

    /// Snapshot of every scratch value.
    pub fn data(&self) -> Map<String, Value> {
        self.inner
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // ── Session and identity ──────────────────────────────────────────────────

    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock()
    }

    pub fn auth(&self) -> &Authentication {
        &self.inner.shared.auth
    }

    pub fn current_user(&self) -> AuthUser {
        self.auth().current_user(self)
    }

    pub fn config(&self) -> &Config {
        &self.inner.shared.config
    }

    // ── Response ──────────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusCode {
        self.inner.response.lock().status()
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.response.lock().insert_header(name, value);
    }

    /// Writes `{"data": payload}` with a JSON content type.
    pub fn json<T: Serialize + ?Sized>(&self, status: StatusCode, payload: &T) -> Result<(), HttpError> {
        let body = serde_json::to_vec(&Envelope { data: payload }).map_err(HttpError::internal)?;
        let mut response = self.inner.response.lock();
        response.content_type_once(ContentType::Json);
        response.write(status, body);
        Ok(())
    }

    pub fn no_content(&self, status: StatusCode) {
        self.inner.response.lock().write(status, Bytes::new());
    }

    pub fn html(&self, status: StatusCode, body: impl Into<String>) {
        let body: String = body.into();
        let mut response = self.inner.response.lock();
        response.content_type_once(ContentType::Html);
        response.write(status, body);
    }

    pub fn text(&self, status: StatusCode, body: impl Into<String>) {
        let body: String = body.into();
        let mut response = self.inner.response.lock();
        response.content_type_once(ContentType::Text);
        response.write(status, body);
    }

    pub fn redirect(&self, status: StatusCode, location: &str) -> Result<(), HttpError> {
        let value = HeaderValue::from_str(location).map_err(HttpError::internal)?;
        let mut response = self.inner.response.lock();
        response.insert_header(LOCATION, value);
        response.write(status, Bytes::new());
        Ok(())
    }

    /// Renders `template` with the scratch data, the current user and `data`
    /// (later keys win) and writes it as HTML.
    pub fn render(&self, status: StatusCode, template: &str, data: Map<String, Value>) -> Result<(), HttpError> {
        let Some(renderer) = self.inner.shared.renderer.as_ref() else {
            return Err(HttpError::with_message(
                StatusCode::INTERNAL_SERVER_ERROR,
                "renderer not registered",
            ));
        };
        let mut view = self.data();
        let user = serde_json::to_value(self.current_user()).map_err(HttpError::internal)?;
        view.insert("user".to_owned(), user);
        view.extend(data);

        let html = renderer.render(template, &view).map_err(HttpError::internal)?;
        self.html(status, html);
        Ok(())
    }

    pub(crate) fn error_json(&self, status: StatusCode, body: &Value) -> Result<(), serde_json::Error> {
        let body = serde_json::to_vec(body)?;
        let mut response = self.inner.response.lock();
        response.reset();
        response.content_type_once(ContentType::Json);
        response.write(status, body);
        Ok(())
    }

    pub(crate) fn error_status(&self, status: StatusCode) {
        let mut response = self.inner.response.lock();
        response.reset();
        response.write(status, Bytes::new());
    }

    pub(crate) fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.response.lock().append_header(name, value);
    }

    /// Takes the assembled response, adding the last saved session cookie.
    pub(crate) fn finish(&self) -> http::Response<Full<Bytes>> {
        let mut response = std::mem::take(&mut *self.inner.response.lock());
        if let Some(cookie) = self.session().take_staged() {
            response.append_header(SET_COOKIE, cookie);
        }
        response.into_http()
    }
}
