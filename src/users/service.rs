//! Signup, signin, and verification-token workflows.

use anyhow::anyhow;
use regex::Regex;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, instrument};
use ulid::Ulid;

use super::directory::UserDirectory;
use super::error::UserError;
use super::models::Person;
use super::password::{constant_time_eq, PasswordHasher, HASH_LEN, SALT_LEN};
use super::repo;

pub const MIN_PASSWORD_LEN: usize = 10;

/// Login handles: lowercase letter first, then lowercase alphanumerics and
/// underscores. Immutable once registered.
#[must_use]
pub fn valid_handle(handle: &str) -> bool {
    Regex::new("^[a-z][a-z0-9_]*$").is_ok_and(|re| re.is_match(handle))
}

pub struct UserService {
    pool: PgPool,
    directory: UserDirectory,
    hasher: PasswordHasher,
}

impl UserService {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            directory: UserDirectory::new(),
            hasher: PasswordHasher::new(),
        }
    }

    /// Person behind a session id, through the read-through cache.
    /// # Errors
    /// Returns `UserError::Storage` if the store read fails.
    pub async fn get_user(&self, id: &str) -> Result<Option<Arc<Person>>, UserError> {
        Ok(self.directory.get_by_id(&self.pool, id).await?)
    }

    /// Register a new account and return its id.
    ///
    /// Input is validated before any storage access. The handle check and the
    /// insert run in one write transaction; when two signups race on the same
    /// handle the store's unique constraint picks the single winner and the
    /// loser observes `HandleInUse`.
    /// # Errors
    /// `InvalidHandle` / `WeakPassword` on malformed input, `HandleInUse` on
    /// conflict, `Hashing` or `Storage` otherwise.
    #[instrument(skip(self, password))]
    pub async fn signup(&self, handle: &str, password: &str) -> Result<String, UserError> {
        if !valid_handle(handle) {
            return Err(UserError::InvalidHandle);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(UserError::WeakPassword);
        }

        // Millisecond timestamp plus random low bits: ids sort roughly by
        // creation time without a central counter.
        let id = Ulid::new().to_string();

        // CPU-bound derivation stays off the async workers and outside the
        // write transaction.
        let (password_hash, salt) = self.derive_hash(password).await?;

        let mut tx = self.pool.begin().await?;
        if repo::is_registered(&mut tx, handle).await? {
            let _ = tx.rollback().await;
            return Err(UserError::HandleInUse);
        }
        let lanes = i32::try_from(self.hasher.lanes()).unwrap_or(1);
        match repo::create_person(&mut tx, &id, handle, &password_hash, &salt, lanes).await {
            Ok(()) => {}
            Err(err) if repo::is_unique_violation(&err) => {
                // Lost the race to a concurrent signup for the same handle.
                let _ = tx.rollback().await;
                return Err(UserError::HandleInUse);
            }
            Err(err) => return Err(err.into()),
        }
        tx.commit().await?;

        debug!(%id, handle, "registered new person");
        // The cache is not pre-populated; the first read loads it lazily.
        Ok(id)
    }

    /// Authenticate by handle and password.
    ///
    /// The lookup bypasses the cache, and every failure collapses into the
    /// same `InvalidCredentials` so unknown handles are indistinguishable
    /// from wrong passwords.
    /// # Errors
    /// `InvalidCredentials` on failed auth, `Hashing` or `Storage` otherwise.
    #[instrument(skip(self, password))]
    pub async fn signin(&self, handle: &str, password: &str) -> Result<Arc<Person>, UserError> {
        let Some(person) = self.directory.get_by_handle(&self.pool, handle).await? else {
            return Err(UserError::InvalidCredentials);
        };

        let stored = person.password.clone();
        let salt = person.salt.clone();
        let lanes = u32::try_from(person.hash_lanes).unwrap_or(1);
        let candidate = password.to_string();
        let verified =
            tokio::task::spawn_blocking(move || {
                PasswordHasher::verify(&candidate, &stored, &salt, lanes)
            })
            .await
            .map_err(|err| UserError::Hashing(anyhow!("verify task failed: {err}")))?;

        if !verified {
            return Err(UserError::InvalidCredentials);
        }

        // Refresh the cache with the row we just read.
        Ok(self.directory.put(person).await)
    }

    /// Consume a verification token and apply the pending email.
    ///
    /// Read, match, delete, and update run in one transaction so two
    /// concurrent validations cannot both succeed. A row is consumed by the
    /// attempt that matched against it even when the presented value was
    /// wrong; missing, expired, and mismatched tokens all surface as the same
    /// `InvalidToken`.
    /// # Errors
    /// `InvalidToken` on any failed validation, `Storage` otherwise.
    #[instrument(skip(self, token))]
    pub async fn validate_token(&self, person_id: &str, token: &str) -> Result<(), UserError> {
        let mut tx = self.pool.begin().await?;

        let Some(pending) = repo::get_token(&mut tx, person_id).await? else {
            let _ = tx.rollback().await;
            return Err(UserError::InvalidToken);
        };

        repo::delete_token(&mut tx, person_id).await?;

        if !constant_time_eq(token.as_bytes(), pending.token.as_bytes()) {
            // Commit the deletion: a guessed-at token is spent, not retryable.
            tx.commit().await?;
            return Err(UserError::InvalidToken);
        }

        let Some(updated) = repo::set_person_email(&mut tx, person_id, &pending.email).await?
        else {
            let _ = tx.rollback().await;
            return Err(UserError::InvalidToken);
        };
        tx.commit().await?;

        // Later reads must see the new email immediately.
        self.directory.put(updated).await;
        Ok(())
    }

    async fn derive_hash(
        &self,
        password: &str,
    ) -> Result<([u8; HASH_LEN], [u8; SALT_LEN]), UserError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || {
            let salt = PasswordHasher::generate_salt()?;
            let hash = hasher.hash(&password, &salt)?;
            Ok::<_, anyhow::Error>((hash, salt))
        })
        .await
        .map_err(|err| UserError::Hashing(anyhow!("hash task failed: {err}")))?
        .map_err(UserError::Hashing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn service() -> UserService {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool");
        UserService::new(pool)
    }

    #[test]
    fn handle_pattern() {
        assert!(valid_handle("alice"));
        assert!(valid_handle("a"));
        assert!(valid_handle("alice_b0b"));

        assert!(!valid_handle(""));
        assert!(!valid_handle("Alice"));
        assert!(!valid_handle("0alice"));
        assert!(!valid_handle("_alice"));
        assert!(!valid_handle("alice-bob"));
        assert!(!valid_handle("alice bob"));
    }

    // Validation happens before any storage access: with a lazy pool these
    // would error out as Storage failures if they ever reached the database.
    #[tokio::test]
    async fn signup_rejects_bad_handle_before_storage() {
        let err = service().signup("Not_Valid", "password123").await;
        assert!(matches!(err, Err(UserError::InvalidHandle)));
    }

    #[tokio::test]
    async fn signup_rejects_short_password_before_storage() {
        let err = service().signup("alice", "short").await;
        assert!(matches!(err, Err(UserError::WeakPassword)));
    }
}
