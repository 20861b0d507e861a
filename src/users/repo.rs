//! Database queries for persons and registration tokens.
//!
//! Reads take the pool; everything that participates in a check-then-write
//! sequence takes the caller's transaction so the store serializes it.

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::Instrument;

use super::models::{Person, RegistrationToken};

const PERSON_COLUMNS: &str = r"
    id, handle, password, salt, hash_lanes,
    EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix,
    display_name, email
";

fn person_from_row(row: &PgRow) -> Person {
    Person {
        id: row.get("id"),
        handle: row.get("handle"),
        password: row.get("password"),
        salt: row.get("salt"),
        hash_lanes: row.get("hash_lanes"),
        created_at_unix: row.get("created_at_unix"),
        display_name: row.get("display_name"),
        email: row.get("email"),
    }
}

pub(super) async fn get_person(pool: &PgPool, id: &str) -> Result<Option<Person>, sqlx::Error> {
    let query = format!("SELECT {PERSON_COLUMNS} FROM persons WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.as_ref().map(person_from_row))
}

pub(super) async fn get_person_by_handle(
    pool: &PgPool,
    handle: &str,
) -> Result<Option<Person>, sqlx::Error> {
    let query = format!("SELECT {PERSON_COLUMNS} FROM persons WHERE handle = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(handle)
        .fetch_optional(pool)
        .instrument(span)
        .await?;
    Ok(row.as_ref().map(person_from_row))
}

pub(super) async fn is_registered(
    tx: &mut Transaction<'_, Postgres>,
    handle: &str,
) -> Result<bool, sqlx::Error> {
    let query = "SELECT 1 FROM persons WHERE handle = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(handle)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await?;
    Ok(row.is_some())
}

pub(super) async fn create_person(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    handle: &str,
    password_hash: &[u8],
    salt: &[u8],
    hash_lanes: i32,
) -> Result<(), sqlx::Error> {
    let query = r"
        INSERT INTO persons (id, handle, password, salt, hash_lanes)
        VALUES ($1, $2, $3, $4, $5)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .bind(handle)
        .bind(password_hash)
        .bind(salt)
        .bind(hash_lanes)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(())
}

/// Unexpired token for a person, if any. Expired rows are invisible here and
/// eventually swept by the issuance flow.
pub(super) async fn get_token(
    tx: &mut Transaction<'_, Postgres>,
    person_id: &str,
) -> Result<Option<RegistrationToken>, sqlx::Error> {
    let query = r"
        SELECT person_id, email, token,
               EXTRACT(EPOCH FROM expires_at)::BIGINT AS expires_at_unix,
               refresh_token
        FROM registration_tokens
        WHERE person_id = $1 AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(person_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await?;
    Ok(row.map(|row| RegistrationToken {
        person_id: row.get("person_id"),
        email: row.get("email"),
        token: row.get("token"),
        expires_at_unix: row.get("expires_at_unix"),
        refresh_token: row.get("refresh_token"),
    }))
}

pub(super) async fn delete_token(
    tx: &mut Transaction<'_, Postgres>,
    person_id: &str,
) -> Result<(), sqlx::Error> {
    let query = "DELETE FROM registration_tokens WHERE person_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(person_id)
        .execute(&mut **tx)
        .instrument(span)
        .await?;
    Ok(())
}

pub(super) async fn set_person_email(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    email: &str,
) -> Result<Option<Person>, sqlx::Error> {
    let query = format!("UPDATE persons SET email = $2 WHERE id = $1 RETURNING {PERSON_COLUMNS}");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(id)
        .bind(email)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await?;
    Ok(row.as_ref().map(person_from_row))
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
