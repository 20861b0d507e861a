//! HTTP surface: router assembly, server lifecycle, and shared web config.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method, Request},
    middleware,
    routing::{get, post},
    Extension, Router,
};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

use crate::recaptcha::Verifier;
use crate::users::UserService;

pub mod guard;
pub mod handlers;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// The domain the site is served under. `localhost*` domains are development
/// setups: plain http and no Secure cookie attribute.
#[derive(Clone, Debug)]
pub struct Domain(String);

impl Domain {
    #[must_use]
    pub fn new(domain: String) -> Self {
        Self(domain)
    }

    #[must_use]
    pub fn is_dev(&self) -> bool {
        self.0.starts_with("localhost")
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        if self.is_dev() {
            format!("http://{}", self.0)
        } else {
            format!("https://{}", self.0)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Request-scoped configuration shared with handlers and middleware.
#[derive(Clone, Debug)]
pub struct WebConfig {
    pub domain: Domain,
    pub session_ttl_seconds: i64,
    pub recaptcha_enabled: bool,
}

impl WebConfig {
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        !self.domain.is_dev()
    }
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    domain: Domain,
    recaptcha_secret: SecretString,
    session_ttl_seconds: i64,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("Failed to apply database schema")?;

    let users = Arc::new(UserService::new(pool.clone()));
    let verifier = Arc::new(Verifier::new(recaptcha_secret)?);
    let config = Arc::new(WebConfig {
        recaptcha_enabled: verifier.enabled(),
        session_ttl_seconds,
        domain,
    });

    let app = app(pool, users, verifier, config.clone())?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Assemble the router: public pages, signed-out-only auth routes, signed-in
/// routes, and the shared middleware stack with the session context innermost
/// so gates and handlers always see a populated `SessionData`.
fn app(
    pool: PgPool,
    users: Arc<UserService>,
    verifier: Arc<Verifier>,
    config: Arc<WebConfig>,
) -> Result<Router> {
    let origin = site_origin(&config.domain)?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true);

    let public = Router::new()
        .route("/", get(handlers::pages::index))
        .route("/health", get(handlers::health::health));

    let signed_out = Router::new()
        .route(
            "/signin",
            get(handlers::pages::signin_form).post(handlers::auth::signin),
        )
        .route(
            "/signup",
            get(handlers::pages::signup_form).post(handlers::auth::signup),
        )
        .route_layer(middleware::from_fn(guard::require_signed_out));

    let signed_in = Router::new()
        .route("/profile", get(handlers::pages::profile))
        .route("/signout", post(handlers::auth::signout))
        .route(
            "/verify-email",
            get(handlers::auth::verify_email).post(handlers::auth::request_verification),
        )
        .route_layer(middleware::from_fn(guard::require_signed_in));

    Ok(public.merge(signed_out).merge(signed_in).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(config))
            .layer(Extension(users))
            .layer(Extension(verifier))
            .layer(Extension(pool))
            .layer(middleware::from_fn(session::session_context)),
    ))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn site_origin(domain: &Domain) -> Result<HeaderValue> {
    let parsed = Url::parse(&domain.base_url())
        .with_context(|| format!("Invalid site domain: {}", domain.as_str()))?;
    let host = parsed
        .host_str()
        .with_context(|| format!("Site domain must include a valid host: {}", domain.as_str()))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build site origin header")
}
