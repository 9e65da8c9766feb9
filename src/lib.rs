use anyhow::Context;
use axum::{handler::HandlerWithoutStateExt, middleware, routing::get, Router};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tower_sessions::{
    cookie::{Key, SameSite},
    MemoryStore, SessionManagerLayer,
};

pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod handlers;
pub mod openid;
pub mod views;

use config::Config;
use openid::IdentityProvider;
use views::Views;

pub const SESSION_COOKIE: &str = "acme.sid";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub views: Arc<Views>,
    pub idp: Arc<IdentityProvider>,
}

/// Builds the router. Discovers the OpenID provider first, so the issuer must be reachable.
pub async fn app(config: Config) -> anyhow::Result<Router> {
    let config = Arc::new(config);
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Build HTTP client")?;
    let idp = IdentityProvider::discover(http.clone(), config.clone())
        .await
        .context("Init OpenID configuration")?;
    let views = Views::new().context("Load templates")?;

    let sessions = SessionManagerLayer::new(MemoryStore::default())
        .with_name(SESSION_COOKIE)
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_secure(config.is_https())
        .with_signed(Key::derive_from(config.secret.expose_secret().as_bytes()));

    let state = AppState {
        config,
        http,
        views: Arc::new(views),
        idp: Arc::new(idp),
    };

    Ok(Router::new()
        .route("/", get(handlers::home))
        .route("/expenses", get(handlers::expenses))
        .route("/tokens", get(handlers::tokens))
        .route("/userinfo", get(handlers::userinfo))
        .route("/login", get(handlers::login))
        .route("/callback", get(handlers::callback))
        .route("/logout", get(handlers::logout))
        .method_not_allowed_fallback(error::method_not_allowed)
        .nest_service(
            "/css",
            ServeDir::new("public/css").not_found_service(error::not_found.into_service()),
        )
        .fallback(error::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            error::render_error_page,
        ))
        .layer(sessions)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
