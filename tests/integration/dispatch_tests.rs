//! Dispatch integration tests.
//!
//! Tests verify:
//! - Named routes reverse, also under group prefixes
//! - A login gate short-circuits before the handler
//! - Middleware from the registry runs in onion order
//! - Parameter precedence and body binding through the full path
//! - Template rendering through the registered renderer

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use http::StatusCode;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use torii::middleware::{self, Middleware};
use torii::{App, BoxError, Context, HttpError, Next, Renderer};

use super::test_utils::{body_json, config, request};

async fn show_user(ctx: Context) -> Result<(), BoxError> {
    ctx.json(StatusCode::OK, &json!({ "id": ctx.param("id") }))?;
    Ok(())
}

// =============================================================================
// Example scenario
// =============================================================================

#[tokio::test]
async fn named_route_reverses_and_guest_is_redirected() {
    let reached = Arc::new(AtomicBool::new(false));

    let mut app = App::new(config());
    app.middleware().register("auth", middleware::authenticated("/login")).unwrap();

    let flag = Arc::clone(&reached);
    let router = app
        .into_router()
        .unwrap()
        .get_named("/users/{id}", "user.show", show_user)
        .use_middleware("auth")
        .get("/dashboard", move |_ctx: Context| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            }
        });

    assert_eq!(router.reverse_url("user.show", &[("id", "42")]), "/users/42");

    let res = router.handle(request("GET", "/dashboard")).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()["location"], "/login");
    assert!(!reached.load(Ordering::SeqCst));

    // Routes registered before `use_middleware` are not gated.
    let res = router.handle(request("GET", "/users/42")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await, json!({ "data": { "id": "42" } }));
}

#[tokio::test]
async fn group_routes_reverse_with_prefix() {
    let router = App::new(config())
        .into_router()
        .unwrap()
        .group("/admin", |admin| {
            admin.group("/reports", |reports| reports.get_named("/{year}", "admin.reports", show_user))
        });

    let url = router.reverse_url("admin.reports", &[("year", "2024")]);
    assert_eq!(url, "/admin/reports/2024");
    assert_eq!(router.handle(request("GET", &url)).await.status(), StatusCode::OK);
}

// =============================================================================
// Middleware ordering
// =============================================================================

fn recording(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Middleware {
    let log = Arc::clone(log);
    Middleware::from_fn(move |ctx: Context, next: Next| {
        let log = Arc::clone(&log);
        async move {
            log.lock().push(format!("{tag}:pre"));
            let result = next.run(ctx).await;
            log.lock().push(format!("{tag}:post"));
            result
        }
    })
}

#[tokio::test]
async fn stack_then_inline_middleware_wrap_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut app = App::new(config());
    app.middleware()
        .register("first", recording("first", &log))
        .unwrap()
        .register("second", recording("second", &log))
        .unwrap()
        .register_stack("web", ["first", "second"]);

    let handler_log = Arc::clone(&log);
    let router = app.into_router().unwrap().use_stack("web").add_route(
        torii::Method::Get,
        "/",
        move |_ctx: Context| {
            let log = Arc::clone(&handler_log);
            async move {
                log.lock().push("handler".to_owned());
                Ok::<_, BoxError>(())
            }
        },
        [recording("inline", &log)],
    );

    router.handle(request("GET", "/")).await;
    assert_eq!(
        *log.lock(),
        [
            "first:pre", "second:pre", "inline:pre", "handler",
            "inline:post", "second:post", "first:post",
        ]
    );
}

#[tokio::test]
async fn error_from_handler_still_unwinds_middleware() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut app = App::new(config());
    app.middleware().register("outer", recording("outer", &log)).unwrap();

    let router = app
        .into_router()
        .unwrap()
        .use_middleware("outer")
        .get("/fail", |_ctx: Context| async { Err::<(), _>(HttpError::forbidden("nope")) });

    let res = router.handle(request("GET", "/fail")).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(res).await, json!({ "message": "nope" }));
    assert_eq!(*log.lock(), ["outer:pre", "outer:post"]);
}

#[tokio::test]
async fn error_responses_keep_middleware_headers() {
    let mut app = App::new(config());
    app.middleware()
        .register("logging", middleware::logging())
        .unwrap()
        .register("csrf", middleware::csrf(middleware::CsrfConfig::default()))
        .unwrap()
        .register_stack("web", ["logging", "csrf"]);

    let router = app
        .into_router()
        .unwrap()
        .use_stack("web")
        .get("/ok", |ctx: Context| async move {
            ctx.no_content(StatusCode::NO_CONTENT);
            Ok::<_, BoxError>(())
        })
        .get("/fail", |_ctx: Context| async { Err::<(), _>(HttpError::bad_request("bad input")) })
        .post("/submit", |_ctx: Context| async { Ok::<_, BoxError>(()) });

    let res = router.handle(request("GET", "/ok")).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.headers()["vary"], "Cookie");

    let res = router.handle(request("GET", "/fail")).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.headers()["vary"], "Cookie");
    assert_eq!(res.headers()["content-type"], "application/json; charset=UTF-8");
    assert_eq!(body_json(res).await, json!({ "message": "bad input" }));

    // Rejected by the csrf middleware itself.
    let mut req = request("POST", "/submit");
    req.headers_mut().insert("x-request-id", http::HeaderValue::from_static("req-7"));
    let res = router.handle(req).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.headers()["x-request-id"], "req-7");
    assert_eq!(res.headers()["vary"], "Cookie");
}

// =============================================================================
// Parameters and binding
// =============================================================================

#[tokio::test]
async fn path_variable_beats_query_and_form() {
    let router = App::new(config()).into_router().unwrap().post("/items/{id}", |ctx: Context| async move {
        let all: Vec<&str> = ctx.param_all("id");
        ctx.json(StatusCode::OK, &json!({ "id": ctx.param("id"), "all": all }))?;
        Ok::<_, BoxError>(())
    });

    let req = http::Request::builder()
        .method("POST")
        .uri("/items/path?id=query")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(bytes::Bytes::from_static(b"id=form"))
        .unwrap();
    let body = body_json(router.handle(req).await).await;
    assert_eq!(body, json!({ "data": { "id": "path", "all": ["path", "query", "form"] } }));
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct NewUser {
    name: String,
}

#[tokio::test]
async fn bind_errors_become_client_errors() {
    let router = App::new(config()).into_router().unwrap().post("/users", |ctx: Context| async move {
        let user: Option<NewUser> = ctx.bind()?;
        ctx.json(StatusCode::CREATED, &json!({ "bound": user.is_some() }))?;
        Ok::<_, BoxError>(())
    });

    let json_request = |body: &'static str| {
        http::Request::builder()
            .method("POST")
            .uri("/users")
            .header("content-type", "application/json")
            .body(bytes::Bytes::from_static(body.as_bytes()))
            .unwrap()
    };

    let res = router.handle(json_request(r#"{"name": "a", "role": "admin"}"#)).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["message"], r#"Request body contains unknown field "role""#);

    let res = router.handle(json_request(r#"{"name": "a"}"#)).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = router.handle(request("POST", "/users")).await;
    assert_eq!(body_json(res).await, json!({ "data": { "bound": false } }));
}

// =============================================================================
// Rendering
// =============================================================================

struct EchoRenderer;

impl Renderer for EchoRenderer {
    fn render(&self, template: &str, data: &Map<String, Value>) -> Result<String, BoxError> {
        Ok(format!(
            "{template}:{}:{}:{}",
            data["title"].as_str().unwrap_or_default(),
            data["current_route"].as_str().unwrap_or_default(),
            data["user"]["type"].as_str().unwrap_or_default(),
        ))
    }
}

#[tokio::test]
async fn render_merges_scratch_data_and_user() {
    let router = App::new(config())
        .with_renderer(EchoRenderer)
        .into_router()
        .unwrap()
        .get_named("/", "home", |ctx: Context| async move {
            let mut data = Map::new();
            data.insert("title".to_owned(), json!("Welcome"));
            ctx.render(StatusCode::OK, "home.html", data)?;
            Ok::<_, BoxError>(())
        });

    let res = router.handle(request("GET", "/")).await;
    assert_eq!(res.headers()["content-type"], "text/html; charset=UTF-8");
    let body = http_body_util::BodyExt::collect(res.into_body()).await.unwrap().to_bytes();
    assert_eq!(&body[..], b"home.html:Welcome:home:guest");
}
