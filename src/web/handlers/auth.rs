//! Signin, signup, signout, and email-verification route adapters.
//!
//! Thin glue: sanitize and validate the form, call into the user service, and
//! translate its result into a redirect or an error status. Auth failures
//! surface exactly the service's undifferentiated messages.

use axum::{
    extract::{Extension, Form, Query},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error};

use super::{sanitize, valid_email};
use crate::recaptcha::Verifier;
use crate::users::{valid_handle, UserError, UserService, MIN_PASSWORD_LEN};
use crate::web::session::{
    clear_session_cookie, create_session, destroy_session, extract_session_token,
    hash_session_token, session_cookie, SessionData,
};
use crate::web::WebConfig;

#[derive(Debug, Deserialize)]
pub struct SigninForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

pub async fn signin(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    users: Extension<Arc<UserService>>,
    config: Extension<Arc<WebConfig>>,
    Form(form): Form<SigninForm>,
) -> Response {
    let username = sanitize(&form.username);
    if !valid_handle(&username) {
        return (StatusCode::BAD_REQUEST, "invalid username".to_string()).into_response();
    }
    let password = form.password.trim();
    if password.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing password".to_string()).into_response();
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return (StatusCode::BAD_REQUEST, "invalid password".to_string()).into_response();
    }

    match users.signin(&username, password).await {
        Ok(person) => start_session(&headers, &pool, &config, &person.id).await,
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    confirm: String,
    #[serde(default, rename = "g-recaptcha-response")]
    recaptcha: String,
}

pub async fn signup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    users: Extension<Arc<UserService>>,
    verifier: Extension<Arc<Verifier>>,
    config: Extension<Arc<WebConfig>>,
    Form(form): Form<SignupForm>,
) -> Response {
    let username = sanitize(&form.username);
    if !valid_handle(&username) {
        return (StatusCode::BAD_REQUEST, "invalid username".to_string()).into_response();
    }
    let password = form.password.trim();
    let confirm = form.confirm.trim();
    if password.is_empty() || password != confirm {
        return (
            StatusCode::BAD_REQUEST,
            "mismatched password/confirm".to_string(),
        )
            .into_response();
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return (StatusCode::BAD_REQUEST, "password too short".to_string()).into_response();
    }

    if let Err(err) = verifier.verify(&form.recaptcha).await {
        debug!("recaptcha rejected: {err}");
        return (StatusCode::BAD_REQUEST, "Invalid reCaptcha.".to_string()).into_response();
    }

    match users.signup(&username, password).await {
        Ok(uid) => start_session(&headers, &pool, &config, &uid).await,
        Err(err) => error_response(&err),
    }
}

pub async fn signout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    config: Extension<Arc<WebConfig>>,
) -> Response {
    if let Some(token) = extract_session_token(&headers) {
        if let Err(err) = destroy_session(&pool, &hash_session_token(&token)).await {
            error!("Failed to destroy session: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
                .into_response();
        }
    }

    // Always clear the cookie, even if there was no session row.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(&config) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (response_headers, Redirect::to("/")).into_response()
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    #[serde(default)]
    tk: String,
}

/// Consume the emailed verification token for the signed-in person.
pub async fn verify_email(
    session: Extension<SessionData>,
    users: Extension<Arc<UserService>>,
    Query(query): Query<VerifyEmailQuery>,
) -> Response {
    let token = query.tk.trim();
    if token.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "invalid email verification".to_string(),
        )
            .into_response();
    }

    match users.validate_token(&session.internal_uid, token).await {
        Ok(()) => Redirect::to("/profile").into_response(),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailForm {
    #[serde(default)]
    email: String,
    #[serde(default, rename = "g-recaptcha-response")]
    recaptcha: String,
}

/// Ask for a verification mail. Token issuance and delivery belong to the
/// external mailer flow; this adapter only vets the request.
pub async fn request_verification(
    verifier: Extension<Arc<Verifier>>,
    Form(form): Form<VerifyEmailForm>,
) -> Response {
    let email = sanitize(&form.email);
    if email.is_empty() || !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "invalid email".to_string()).into_response();
    }

    if let Err(err) = verifier.verify(&form.recaptcha).await {
        debug!("recaptcha rejected: {err}");
        return (StatusCode::BAD_REQUEST, "Invalid reCaptcha.".to_string()).into_response();
    }

    Redirect::to("/profile").into_response()
}

/// Replace any existing session with a fresh one for `uid` and redirect home.
async fn start_session(
    headers: &HeaderMap,
    pool: &PgPool,
    config: &WebConfig,
    uid: &str,
) -> Response {
    // A fresh row on every signin keeps pre-auth cookies from being promoted.
    if let Some(old) = extract_session_token(headers) {
        if let Err(err) = destroy_session(pool, &hash_session_token(&old)).await {
            error!("Failed to destroy previous session: {err}");
        }
    }

    let token = match create_session(pool, uid, config.session_ttl_seconds).await {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
                .into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    match session_cookie(config, &token) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
                .into_response();
        }
    }
    (response_headers, Redirect::to("/")).into_response()
}

fn error_response(err: &UserError) -> Response {
    match err {
        UserError::InvalidHandle | UserError::WeakPassword | UserError::InvalidToken => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        UserError::InvalidCredentials => {
            (StatusCode::UNAUTHORIZED, err.to_string()).into_response()
        }
        UserError::HandleInUse => (StatusCode::CONFLICT, err.to_string()).into_response(),
        UserError::Hashing(_) | UserError::Storage(_) => {
            error!("auth request failed: {err:?}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::Domain;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool")
    }

    fn config() -> Arc<WebConfig> {
        Arc::new(WebConfig {
            domain: Domain::new("localhost:8080".to_string()),
            session_ttl_seconds: 3600,
            recaptcha_enabled: false,
        })
    }

    fn users() -> Arc<UserService> {
        Arc::new(UserService::new(lazy_pool()))
    }

    fn verifier() -> Arc<Verifier> {
        Arc::new(Verifier::new(secrecy::SecretString::default()).expect("verifier"))
    }

    // Validation failures must short-circuit before any storage access; the
    // lazy pool would turn a storage touch into a 500.
    #[tokio::test]
    async fn signin_rejects_invalid_username() {
        let response = signin(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(users()),
            Extension(config()),
            Form(SigninForm {
                username: "Not Valid".to_string(),
                password: "password123".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signin_rejects_missing_password() {
        let response = signin(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(users()),
            Extension(config()),
            Form(SigninForm {
                username: "alice".to_string(),
                password: "   ".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signup_rejects_mismatched_confirmation() {
        let response = signup(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(users()),
            Extension(verifier()),
            Extension(config()),
            Form(SignupForm {
                username: "alice".to_string(),
                password: "password123".to_string(),
                confirm: "password124".to_string(),
                recaptcha: String::new(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn signup_rejects_short_password() {
        let response = signup(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(users()),
            Extension(verifier()),
            Extension(config()),
            Form(SignupForm {
                username: "alice".to_string(),
                password: "short".to_string(),
                confirm: "short".to_string(),
                recaptcha: String::new(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn verify_email_rejects_missing_token() {
        let response = verify_email(
            Extension(SessionData::default()),
            Extension(users()),
            Query(VerifyEmailQuery { tk: String::new() }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn request_verification_rejects_bad_email() {
        let response = request_verification(
            Extension(verifier()),
            Form(VerifyEmailForm {
                email: "not-an-email".to_string(),
                recaptcha: String::new(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn business_errors_map_to_statuses() {
        assert_eq!(
            error_response(&UserError::InvalidCredentials).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            error_response(&UserError::HandleInUse).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_response(&UserError::InvalidToken).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
