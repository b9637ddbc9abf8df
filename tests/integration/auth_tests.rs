//! Authentication integration tests.
//!
//! Tests verify:
//! - The OAuth redirect, callback state check and token exchange end to end
//! - Provider refusals and unreachable providers surface as typed errors
//! - Password login against a stored argon2id hash

use http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use url::Url;
use uuid::Uuid;

use torii::auth::{AuthError, PasswordHashParams, hash_password};
use torii::{App, Authenticatable, BoxError, Config, Context, HttpError, Router};

use super::test_utils::{body_json, config, request, session_cookie, spawn_provider, with_cookie};

struct Member(Uuid);

impl Authenticatable for Member {
    fn auth_id(&self) -> Uuid {
        self.0
    }
}

fn oauth_config(endpoint: &str) -> Config {
    let mut config = config();
    config.auth.endpoint = endpoint.to_owned();
    config.auth.client_id = "client-1".to_owned();
    config.auth.client_secret = "shh".to_owned();
    config.auth.scopes = vec!["openid".to_owned(), "email".to_owned()];
    config
}

fn oauth_router(config: Config) -> Router {
    App::new(config)
        .into_router()
        .unwrap()
        .get("/auth/login", |ctx: Context| async move {
            let url = ctx.auth().authorization_redirect_uri(&ctx)?;
            ctx.redirect(StatusCode::FOUND, &url)?;
            Ok::<_, BoxError>(())
        })
        .get("/auth/callback", |ctx: Context| async move {
            let state = ctx.param("state").unwrap_or_default();
            ctx.auth().compare_oauth_state(&ctx, state)?;
            let code = ctx.param("code").ok_or_else(|| HttpError::bad_request("missing code"))?;
            let token = ctx.auth().exchange_authorization_code(code).await?;
            ctx.json(StatusCode::OK, &token)?;
            Ok::<_, BoxError>(())
        })
}

#[tokio::test]
async fn oauth_round_trip() {
    let provider = spawn_provider(
        StatusCode::OK,
        json!({ "token_type": "Bearer", "access_token": "at-1", "expires_in": 3600 }),
    )
    .await;
    let router = oauth_router(oauth_config(&provider.endpoint));

    let res = router.handle(request("GET", "/auth/login")).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    let cookie = session_cookie(&res).unwrap();
    let location = Url::parse(res.headers()["location"].to_str().unwrap()).unwrap();
    assert_eq!(location.path(), "/authorize");
    let query: Vec<(String, String)> = location.query_pairs().into_owned().collect();
    let get = |key: &str| query.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()).unwrap();
    assert_eq!(get("client_id"), "client-1");
    assert_eq!(get("scope"), "openid email");
    let state = get("state");
    assert_eq!(state.len(), 32);

    let callback = format!("/auth/callback?code=abc&state={state}");
    let res = router.handle(with_cookie(request("GET", &callback), &cookie)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["data"]["access_token"], "at-1");
    assert_eq!(body["data"]["expires_in"], 3600);

    let received = provider.received.lock().clone();
    assert_eq!(received.len(), 1);
    let (path, sent) = &received[0];
    assert_eq!(path, "/token");
    assert_eq!(sent["grant_type"], "authorization_code");
    assert_eq!(sent["code"], "abc");
    assert_eq!(sent["client_secret"], "shh");
    assert_eq!(sent["redirect_uri"], "http://localhost:3000/auth/callback");
}

#[tokio::test]
async fn consumed_state_is_not_accepted_twice() {
    let provider = spawn_provider(StatusCode::OK, json!({ "token_type": "Bearer", "access_token": "t" })).await;
    let router = oauth_router(oauth_config(&provider.endpoint));

    let res = router.handle(request("GET", "/auth/login")).await;
    let cookie = session_cookie(&res).unwrap();
    let location = Url::parse(res.headers()["location"].to_str().unwrap()).unwrap();
    let state = location.query_pairs().find(|(k, _)| k == "state").unwrap().1.into_owned();

    let callback = format!("/auth/callback?code=abc&state={state}");
    let res = router.handle(with_cookie(request("GET", &callback), &cookie)).await;
    let consumed = session_cookie(&res).unwrap();

    let res = router.handle(with_cookie(request("GET", &callback), &consumed)).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(res).await["message"], "no oauth state stored in the session");

    let res = router.handle(request("GET", "/auth/callback?code=abc&state=forged")).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(provider.received.lock().len(), 1);
}

#[tokio::test]
async fn provider_refusal_is_a_provider_error() {
    let provider = spawn_provider(
        StatusCode::BAD_REQUEST,
        json!({ "error": "invalid_grant", "error_description": "code expired" }),
    )
    .await;
    let app_config = oauth_config(&provider.endpoint);
    let auth = torii::Authentication::new(&app_config).unwrap();

    match auth.exchange_authorization_code("stale").await {
        Err(AuthError::Provider { status, error, description }) => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(error, "invalid_grant");
            assert_eq!(description, "code expired");
        }
        other => panic!("expected a provider error, got {other:?}"),
    }

    // Through the router it becomes a 502 without provider details.
    let router = oauth_router(app_config);
    let res = router.handle(request("GET", "/auth/login")).await;
    let cookie = session_cookie(&res).unwrap();
    let location = Url::parse(res.headers()["location"].to_str().unwrap()).unwrap();
    let state = location.query_pairs().find(|(k, _)| k == "state").unwrap().1.into_owned();
    let callback = format!("/auth/callback?code=stale&state={state}");
    let res = router.handle(with_cookie(request("GET", &callback), &cookie)).await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(res).await, json!({ "message": "Bad Gateway" }));
}

#[tokio::test]
async fn unreachable_provider_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let auth = torii::Authentication::new(&oauth_config(&endpoint)).unwrap();
    let err = auth.exchange_authorization_code("abc").await.unwrap_err();
    assert!(matches!(err, AuthError::Transport(_)), "got {err:?}");
}

// =============================================================================
// Password login
// =============================================================================

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

#[tokio::test]
async fn password_login_checks_the_stored_hash() {
    let cheap = PasswordHashParams { memory: 1024, iterations: 1, parallelism: 1, ..Default::default() };
    let stored = hash_password("correct horse", &cheap).unwrap();
    let member_id = Uuid::new_v4();

    let router = App::new(config()).into_router().unwrap().post("/login", move |ctx: Context| {
        let stored = stored.clone();
        async move {
            let Some(creds) = ctx.bind::<Credentials>()? else {
                return Err(HttpError::bad_request("credentials required").into());
            };
            let (matched, needs_rehash) = ctx.auth().verify_password(&creds.password, &stored)?;
            if creds.email != "ada@example.com" || !matched {
                return Err(HttpError::unauthorized("invalid credentials").into());
            }
            ctx.auth().login(&ctx, &Member(member_id))?;
            ctx.json(StatusCode::OK, &json!({ "needs_rehash": needs_rehash }))?;
            Ok::<_, BoxError>(())
        }
    });

    let login = |body: &'static str| {
        http::Request::builder()
            .method("POST")
            .uri("/login")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(bytes::Bytes::from_static(body.as_bytes()))
            .unwrap()
    };

    let res = router.handle(login("email=ada%40example.com&password=wrong")).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert!(session_cookie(&res).is_none());

    let res = router.handle(login("email=ada%40example.com&password=correct+horse")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(session_cookie(&res).is_some());
    // Stored with weaker costs than the configured defaults.
    assert_eq!(body_json(res).await, json!({ "data": { "needs_rehash": true } }));
}

#[tokio::test]
async fn unreadable_hash_is_a_server_error() {
    let router = App::new(config()).into_router().unwrap().post("/verify", |ctx: Context| async move {
        ctx.auth().verify_password("pw", "$argon2id$v=16$m=1024,t=1,p=1$c2FsdA$a2V5")?;
        Ok::<_, BoxError>(())
    });

    let res = router.handle(request("POST", "/verify")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(res).await, json!({ "message": "Internal Server Error" }));
}
