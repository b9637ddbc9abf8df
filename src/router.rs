//! Radix-tree request router with named routes, groups and middleware.
//!
//! One `matchit` tree per HTTP method. Every route's middleware chain is
//! composed once, at registration, so a request only pays for the tree lookup
//! and one dynamic call per layer.
//!
//! # Middleware resolution
//!
//! A router keeps an ordered list of middleware *names*
//! ([`use_middleware`](Router::use_middleware),
//! [`use_stack`](Router::use_stack)). When a route is registered those names
//! are looked up in the registry and followed by the middleware passed
//! inline. Only routes registered after a `use_*` call see it.
//!
//! # Groups
//!
//! [`group`](Router::group) opens a sub-router under a path prefix. It shares
//! the route table but starts with an empty middleware list;
//! [`group_inheriting`](Router::group_inheriting) starts from a copy of the
//! parent's list instead.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{ALLOW, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use matchit::Router as MatchitRouter;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::app::Shared;
use crate::context::Context;
use crate::error::HttpError;
use crate::error_handler;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::middleware::{Middleware, MiddlewareStack};
use crate::request::Request;

const INLINE_LABEL: &str = "<inline>";

/// Bytes escaped in a reversed path segment (RFC 3986 `pchar` complement).
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Introspection view of a registered route.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RouteConfig {
    pub method: Method,
    pub path: String,
    pub name: Option<String>,
    pub aliases: Vec<String>,
    /// Labels of the composed chain, outermost first.
    pub middleware: Vec<String>,
}

struct Route {
    config: Arc<RouteConfig>,
    chain: BoxedHandler,
}

#[derive(Default)]
struct RouteTable {
    trees: HashMap<Method, MatchitRouter<usize>>,
    routes: Vec<Route>,
    names: HashMap<String, usize>,
}

enum Lookup<'a> {
    Found(&'a Route, Vec<(String, String)>),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

impl RouteTable {
    fn insert(&mut self, method: Method, path: &str, index: usize) {
        self.trees
            .entry(method)
            .or_default()
            .insert(path, index)
            .unwrap_or_else(|e| panic!("invalid route `{method} {path}`: {e}"));
    }

    fn lookup(&self, method: Method, path: &str) -> Lookup<'_> {
        if let Some(matched) = self.trees.get(&method).and_then(|tree| tree.at(path).ok()) {
            // Matching runs on the raw path; values are handed out decoded,
            // like query and form values.
            let params = matched
                .params
                .iter()
                .map(|(k, v)| (k.to_owned(), percent_decode_str(v).decode_utf8_lossy().into_owned()))
                .collect();
            return Lookup::Found(&self.routes[*matched.value], params);
        }
        let mut allowed: Vec<Method> = self
            .trees
            .iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(m, _)| *m)
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort();
        Lookup::MethodNotAllowed(allowed)
    }
}

/// The application router.
///
/// Obtained from [`App::into_router`](crate::App::into_router). Registration
/// methods consume and return `self`, so a route table reads as one chain:
///
/// ```rust,no_run
/// # use torii::{App, Config, Context, BoxError};
/// # async fn show(_: Context) -> Result<(), BoxError> { Ok(()) }
/// # async fn dashboard(_: Context) -> Result<(), BoxError> { Ok(()) }
/// # fn build(app: App) -> Result<torii::Router, torii::Error> {
/// let router = app
///     .into_router()?
///     .use_middleware("logging")
///     .get_named("/users/{id}", "user.show", show)
///     .group("/admin", |admin| admin.use_middleware("auth").get("/", dashboard));
/// # Ok(router) }
/// ```
pub struct Router {
    shared: Arc<Shared>,
    table: RouteTable,
    prefix: String,
    middleware: Vec<String>,
}

impl Router {
    pub(crate) fn root(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            table: RouteTable::default(),
            prefix: String::new(),
            middleware: Vec::new(),
        }
    }

    // ── Middleware ────────────────────────────────────────────────────────────

    /// Appends a registry middleware name for routes registered from now on.
    pub fn use_middleware(mut self, name: impl Into<String>) -> Self {
        self.middleware.push(name.into());
        self
    }

    /// Appends every name of the registry stack `name`.
    pub fn use_stack(mut self, name: &str) -> Self {
        let names = self.shared.registry.stack(name).to_vec();
        self.middleware.extend(names);
        self
    }

    // ── Registration ──────────────────────────────────────────────────────────

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.add(Method::Get, path, None, handler, Vec::new())
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.add(Method::Post, path, None, handler, Vec::new())
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.add(Method::Put, path, None, handler, Vec::new())
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.add(Method::Patch, path, None, handler, Vec::new())
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.add(Method::Delete, path, None, handler, Vec::new())
    }

    pub fn options(self, path: &str, handler: impl Handler) -> Self {
        self.add(Method::Options, path, None, handler, Vec::new())
    }

    pub fn head(self, path: &str, handler: impl Handler) -> Self {
        self.add(Method::Head, path, None, handler, Vec::new())
    }

    pub fn trace(self, path: &str, handler: impl Handler) -> Self {
        self.add(Method::Trace, path, None, handler, Vec::new())
    }

    pub fn connect(self, path: &str, handler: impl Handler) -> Self {
        self.add(Method::Connect, path, None, handler, Vec::new())
    }

    pub fn get_named(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.add(Method::Get, path, Some(name), handler, Vec::new())
    }

    pub fn post_named(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.add(Method::Post, path, Some(name), handler, Vec::new())
    }

    pub fn put_named(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.add(Method::Put, path, Some(name), handler, Vec::new())
    }

    pub fn patch_named(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.add(Method::Patch, path, Some(name), handler, Vec::new())
    }

    pub fn delete_named(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.add(Method::Delete, path, Some(name), handler, Vec::new())
    }

    /// Registers a route with middleware that applies to it alone. The inline
    /// middleware runs inside the router's named middleware.
    pub fn add_route(
        self,
        method: Method,
        path: &str,
        handler: impl Handler,
        middleware: impl IntoIterator<Item = Middleware>,
    ) -> Self {
        self.add(method, path, None, handler, middleware.into_iter().collect())
    }

    /// [`add_route`](Self::add_route) plus a name for [`reverse_url`](Self::reverse_url).
    pub fn add_named_route(
        self,
        method: Method,
        path: &str,
        name: &str,
        handler: impl Handler,
        middleware: impl IntoIterator<Item = Middleware>,
    ) -> Self {
        self.add(method, path, Some(name), handler, middleware.into_iter().collect())
    }

    fn add(
        mut self,
        method: Method,
        path: &str,
        name: Option<&str>,
        handler: impl Handler,
        inline: Vec<Middleware>,
    ) -> Self {
        let full_path = self.join(path);

        let mut stack = MiddlewareStack::new();
        for mw_name in &self.middleware {
            match self.shared.registry.find(mw_name) {
                Ok(middleware) => stack.push(mw_name.clone(), middleware.clone()),
                Err(e) => warn!(route = %full_path, "{e}, leaving it out of the chain"),
            }
        }
        for middleware in inline {
            stack.push(INLINE_LABEL, middleware);
        }

        let config = RouteConfig {
            method,
            path: full_path.clone(),
            name: name.map(str::to_owned),
            aliases: Vec::new(),
            middleware: stack.labels(),
        };
        let index = self.table.routes.len();
        self.table.insert(method, &full_path, index);
        self.table.routes.push(Route {
            config: Arc::new(config),
            chain: stack.compose(handler.into_boxed_handler()),
        });
        if let Some(name) = name {
            if self.table.names.insert(name.to_owned(), index).is_some() {
                warn!(name, route = %full_path, "route name reused, reversing now targets the newer route");
            }
        }
        debug!(%method, path = %full_path, middleware = stack.len(), "route registered");
        self
    }

    /// Serves the named route under another path too. The alias shares the
    /// route's method and chain.
    ///
    /// # Panics
    ///
    /// Panics when `name` is unknown or `path` conflicts with another route.
    pub fn alias(mut self, name: &str, path: &str) -> Self {
        let Some(&index) = self.table.names.get(name) else {
            panic!("cannot alias unknown route `{name}`");
        };
        let full_path = self.join(path);
        let method = self.table.routes[index].config.method;
        self.table.insert(method, &full_path, index);
        Arc::make_mut(&mut self.table.routes[index].config).aliases.push(full_path);
        self
    }

    // ── Groups ────────────────────────────────────────────────────────────────

    /// Registers routes under `prefix` with an empty middleware list.
    pub fn group(self, prefix: &str, build: impl FnOnce(Router) -> Router) -> Self {
        self.nest(prefix, Vec::new(), build)
    }

    /// Like [`group`](Self::group), but the sub-router starts with the
    /// parent's middleware names.
    pub fn group_inheriting(self, prefix: &str, build: impl FnOnce(Router) -> Router) -> Self {
        let inherited = self.middleware.clone();
        self.nest(prefix, inherited, build)
    }

    fn nest(
        mut self,
        prefix: &str,
        middleware: Vec<String>,
        build: impl FnOnce(Router) -> Router,
    ) -> Self {
        let child = Router {
            shared: Arc::clone(&self.shared),
            table: mem::take(&mut self.table),
            prefix: self.join(prefix),
            middleware,
        };
        self.table = build(child).table;
        self
    }

    fn join(&self, path: &str) -> String {
        match (self.prefix.is_empty(), path) {
            (true, _) => path.to_owned(),
            (false, "" | "/") => self.prefix.clone(),
            (false, _) => format!("{}{path}", self.prefix),
        }
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub fn routes(&self) -> Vec<RouteConfig> {
        self.table.routes.iter().map(|r| (*r.config).clone()).collect()
    }

    /// Path of the route called `name` with its variables filled in from
    /// `pairs`. Returns an empty string when the name is unknown or the pairs
    /// do not cover the route's variables exactly.
    pub fn reverse_url(&self, name: &str, pairs: &[(&str, &str)]) -> String {
        let Some(&index) = self.table.names.get(name) else {
            warn!(name, "reverse_url: no route with this name");
            return String::new();
        };
        let pattern = &self.table.routes[index].config.path;
        match fill_pattern(pattern, pairs) {
            Some(url) => url,
            None => {
                warn!(name, pattern = %pattern, given = pairs.len(), "reverse_url: parameters do not match the route");
                String::new()
            }
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Routes one fully buffered request through its chain.
    ///
    /// Errors returned by the chain, unknown paths (404) and unsupported
    /// methods (405 with `Allow`) all go through the error normalizer.
    pub async fn handle(&self, req: http::Request<Bytes>) -> http::Response<Full<Bytes>> {
        let request = Request::new(req);
        let lookup = match Method::try_from(request.method()) {
            Ok(method) => self.table.lookup(method, request.path()),
            Err(()) => Lookup::MethodNotAllowed(Vec::new()),
        };

        match lookup {
            Lookup::Found(route, params) => {
                let ctx = Context::new(
                    Arc::clone(&self.shared),
                    request,
                    Some(Arc::clone(&route.config)),
                    params,
                );
                if let Err(err) = route.chain.call(ctx.clone()).await {
                    error_handler::handle(&ctx, err);
                }
                ctx.finish()
            }
            Lookup::MethodNotAllowed(allowed) => {
                let ctx = Context::new(Arc::clone(&self.shared), request, None, Vec::new());
                error_handler::handle(&ctx, HttpError::new(StatusCode::METHOD_NOT_ALLOWED).into());
                if !allowed.is_empty() {
                    let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
                    if let Ok(value) = HeaderValue::from_str(&allow) {
                        ctx.set_header(ALLOW, value);
                    }
                }
                ctx.finish()
            }
            Lookup::NotFound => self.reject(request, HttpError::not_found()),
        }
    }

    /// Answers a request that never reaches a route with `err`.
    pub(crate) fn reject_raw(&self, req: http::Request<Bytes>, err: HttpError) -> http::Response<Full<Bytes>> {
        self.reject(Request::new(req), err)
    }

    fn reject(&self, request: Request, err: HttpError) -> http::Response<Full<Bytes>> {
        let ctx = Context::new(Arc::clone(&self.shared), request, None, Vec::new());
        error_handler::handle(&ctx, err.into());
        ctx.finish()
    }
}

/// Substitutes `{name}` and `{*name}` segments, percent-encoding the values.
/// A catch-all keeps its `/` separators. Every variable must be given exactly
/// once and no extra pairs are allowed.
fn fill_pattern(pattern: &str, pairs: &[(&str, &str)]) -> Option<String> {
    let mut url = String::with_capacity(pattern.len());
    let mut used = 0;
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        url.push_str(&rest[..open]);
        let close = open + rest[open..].find('}')?;
        let variable = &rest[open + 1..close];
        let key = variable.trim_start_matches('*');
        let (_, value) = pairs.iter().find(|(k, _)| *k == key)?;
        if variable.starts_with('*') {
            let segments: Vec<String> =
                value.split('/').map(|s| utf8_percent_encode(s, SEGMENT).to_string()).collect();
            url.push_str(&segments.join("/"));
        } else {
            url.extend(utf8_percent_encode(value, SEGMENT));
        }
        used += 1;
        rest = &rest[close + 1..];
    }
    url.push_str(rest);
    (used == pairs.len()).then_some(url)
}
