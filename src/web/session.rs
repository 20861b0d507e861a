//! Per-request session context over the persistent session store.
//!
//! Sessions are rows keyed by the SHA-256 of a random cookie token; the raw
//! token only ever lives in the cookie. The middleware resolves the cookie to
//! a `SessionData` view for exactly one request: built fresh here, attached to
//! the request's extensions, and gone when the request is.

use anyhow::{anyhow, Context, Result};
use axum::{
    extract::{Extension, Request},
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{error, warn, Instrument};
use uuid::Uuid;

use super::WebConfig;
use crate::users::UserService;

pub const SESSION_COOKIE_NAME: &str = "household_session";

/// Session-derived view handed to gates and handlers. Never persisted as-is
/// and never shared across requests.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SessionData {
    pub email: String,
    pub name: String,
    pub handle: String,
    pub internal_uid: String,
    pub err_msg: String,
    pub csrf_token: String,
    pub recaptcha_enabled: bool,
}

impl SessionData {
    #[must_use]
    pub fn signed_in(&self) -> bool {
        !self.internal_uid.is_empty()
    }
}

/// Resolve the session cookie into a `SessionData` for this request.
///
/// A session that references a person the store no longer has is a
/// consistency error: the session is destroyed and the request continues
/// anonymous. Store failures are request-fatal.
pub async fn session_context(
    Extension(pool): Extension<PgPool>,
    Extension(users): Extension<Arc<UserService>>,
    Extension(config): Extension<Arc<WebConfig>>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut data = SessionData {
        recaptcha_enabled: config.recaptcha_enabled,
        ..SessionData::default()
    };
    let mut clear_cookie = false;

    if let Some(token) = extract_session_token(request.headers()) {
        let token_hash = hash_session_token(&token);
        match load_session(&pool, &token_hash).await {
            Ok(Some(stored)) => {
                let uid = get_string(&stored, "uid");
                let mut person_gone = false;
                if !uid.is_empty() {
                    match users.get_user(&uid).await {
                        Ok(Some(person)) => {
                            data.internal_uid = person.id.clone();
                            data.handle = person.handle.clone();
                            data.name = person.name().to_string();
                            data.email = person.email.clone().unwrap_or_default();
                        }
                        Ok(None) => {
                            warn!(%uid, "session references a missing person, destroying it");
                            if let Err(err) = destroy_session(&pool, &token_hash).await {
                                error!("Failed to destroy inconsistent session: {err}");
                            }
                            person_gone = true;
                            clear_cookie = true;
                        }
                        Err(err) => {
                            error!("Failed to resolve session person: {err}");
                            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                        }
                    }
                }

                if !person_gone {
                    // Live sessions always carry a CSRF token; mint one for
                    // rows that predate it.
                    let mut csrf = get_string(&stored, "csrf");
                    if csrf.is_empty() {
                        csrf = Uuid::new_v4().to_string();
                        if let Err(err) = put_value(&pool, &token_hash, "csrf", &csrf).await {
                            error!("Failed to store csrf token: {err}");
                        }
                    }
                    data.csrf_token = csrf;
                }
            }
            // Unknown or expired cookie: anonymous request.
            Ok(None) => {}
            Err(err) => {
                error!("Failed to load session: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    request.extensions_mut().insert(data);
    let mut response = next.run(request).await;
    if clear_cookie {
        if let Ok(cookie) = clear_session_cookie(&config) {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
    }
    response
}

/// Create a session row carrying `uid` and a fresh CSRF token, returning the
/// raw cookie token. Only the hash is stored.
/// # Errors
/// Returns an error if the store rejects the insert.
pub async fn create_session(pool: &PgPool, uid: &str, ttl_seconds: i64) -> Result<String> {
    let query = r"
        INSERT INTO sessions (token_hash, data, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    let data = serde_json::json!({
        "uid": uid,
        "csrf": Uuid::new_v4().to_string(),
    });

    for _ in 0..3 {
        let token = generate_session_token()?;
        let token_hash = hash_session_token(&token);
        let result = sqlx::query(query)
            .bind(token_hash)
            .bind(&data)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Session payload for an unexpired row, if any.
async fn load_session(pool: &PgPool, token_hash: &[u8]) -> Result<Option<Value>, sqlx::Error> {
    let query = "SELECT data FROM sessions WHERE token_hash = $1 AND expires_at > NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.map(|row| row.get("data")))
}

/// Write one key into the session payload.
async fn put_value(
    pool: &PgPool,
    token_hash: &[u8],
    key: &str,
    value: &str,
) -> Result<(), sqlx::Error> {
    let query = r"
        UPDATE sessions
        SET data = jsonb_set(data, ARRAY[$2]::text[], to_jsonb($3::text), true)
        WHERE token_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .bind(key)
        .bind(value)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(())
}

/// Delete the session row. Idempotent; missing rows are fine.
pub async fn destroy_session(pool: &PgPool, token_hash: &[u8]) -> Result<(), sqlx::Error> {
    let query = "DELETE FROM sessions WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await?;
    Ok(())
}

fn get_string(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Random cookie token. The raw value is only returned to set the cookie.
fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a session token so raw values never touch the database.
pub(crate) fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(crate) fn session_cookie(
    config: &WebConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds;
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(config: &WebConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
