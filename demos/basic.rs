//! Minimal torii app: JSON endpoints, a password login, flash messages and a
//! CSRF-protected form post.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -c jar -X POST http://localhost:3000/login \
//!        -d 'email=ada@example.com&password=lovelace'
//!   curl -b jar http://localhost:3000/account
//!   curl -b jar -c jar http://localhost:3000/account/token
//!   curl -b jar -X POST http://localhost:3000/account/notes \
//!        -H "x-csrf-token: <token from above>"

use http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use torii::auth::{PasswordHashParams, hash_password};
use torii::middleware::{self, CsrfConfig};
use torii::{App, Authenticatable, BoxError, Config, Context, HttpError, Server};

struct Member {
    id: Uuid,
    email: String,
}

impl Authenticatable for Member {
    fn auth_id(&self) -> Uuid {
        self.id
    }

    fn auth_payload(&self) -> serde_json::Value {
        json!({ "email": self.email })
    }
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

#[tokio::main]
async fn main() -> Result<(), torii::Error> {
    tracing_subscriber::fmt::init();

    let mut config = Config::default();
    config.session.secret = std::env::var("SESSION_SECRET").unwrap_or_else(|_| "change-me".to_owned());

    // One demo account; real apps keep the hash in their user table.
    let stored_hash =
        hash_password("lovelace", &PasswordHashParams::default()).expect("hashing demo password");

    let mut app = App::new(config.clone());
    app.middleware()
        .register("logging", middleware::logging())?
        .register("csrf", middleware::csrf(CsrfConfig::default()))?
        .register("auth", middleware::authenticated("/login"))?
        .register_stack("web", ["logging", "csrf"]);

    let router = app
        .into_router()?
        .use_middleware("logging")
        .get_named("/users/{id}", "user.show", show_user)
        .get("/login", login_form)
        .post("/login", move |ctx: Context| {
            let stored_hash = stored_hash.clone();
            async move { login(ctx, &stored_hash).await }
        })
        .group("/account", |account| {
            account
                .use_stack("web")
                .use_middleware("auth")
                .get_named("/", "account", show_account)
                .get("/token", show_token)
                .post("/notes", create_note)
        });

    for route in router.routes() {
        tracing::info!(method = %route.method, path = %route.path, middleware = ?route.middleware, "route");
    }

    Server::from_config(&config).serve(router).await
}

// GET /users/{id}
async fn show_user(ctx: Context) -> Result<(), BoxError> {
    ctx.json(StatusCode::OK, &json!({ "id": ctx.param("id"), "name": "alice" }))?;
    Ok(())
}

// GET /login
async fn login_form(ctx: Context) -> Result<(), BoxError> {
    let errors = ctx.session().get_flash("error");
    ctx.json(StatusCode::OK, &json!({ "errors": errors }))?;
    Ok(())
}

// POST /login
async fn login(ctx: Context, stored_hash: &str) -> Result<(), BoxError> {
    let Some(creds) = ctx.bind::<Credentials>()? else {
        return Err(HttpError::bad_request("email and password are required").into());
    };
    let (matched, _) = ctx.auth().verify_password(&creds.password, stored_hash)?;
    if creds.email != "ada@example.com" || !matched {
        ctx.session().flash("error", "invalid credentials")?;
        ctx.redirect(StatusCode::SEE_OTHER, "/login")?;
        return Ok(());
    }

    let member = Member { id: Uuid::new_v4(), email: creds.email };
    ctx.auth().login(&ctx, &member)?;
    ctx.session().flash("notice", "welcome back")?;
    ctx.redirect(StatusCode::SEE_OTHER, "/account")?;
    Ok(())
}

// GET /account
async fn show_account(ctx: Context) -> Result<(), BoxError> {
    let notices = ctx.session().get_flash("notice");
    ctx.json(StatusCode::OK, &json!({ "user": ctx.current_user(), "notices": notices }))?;
    Ok(())
}

// GET /account/token
async fn show_token(ctx: Context) -> Result<(), BoxError> {
    ctx.json(StatusCode::OK, &json!({ "csrf": ctx.get("csrf") }))?;
    Ok(())
}

// POST /account/notes → 201, only with a matching X-CSRF-Token
async fn create_note(ctx: Context) -> Result<(), BoxError> {
    ctx.json(StatusCode::CREATED, &json!({ "saved": true }))?;
    Ok(())
}
