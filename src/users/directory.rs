//! Read-through cache over the persistent person store.
//!
//! Keyed by person id. Entries have no TTL and are never evicted; they are
//! replaced by the unconditional `put` that every mutation path performs after
//! a committed write. The population is the registered-account set, which is
//! small relative to memory, and identity fields are immutable.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::debug;

use super::models::Person;
use super::repo;

#[derive(Default)]
pub struct UserDirectory {
    entries: RwLock<HashMap<String, Arc<Person>>>,
}

impl UserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entry if present, otherwise a store read that populates the
    /// cache. Racing first-time loads converge on a single winning entry:
    /// whoever inserts first wins and every caller gets that value.
    /// # Errors
    /// Returns an error if the store read fails.
    pub async fn get_by_id(
        &self,
        pool: &PgPool,
        id: &str,
    ) -> Result<Option<Arc<Person>>, sqlx::Error> {
        if let Some(found) = self.entries.read().await.get(id) {
            return Ok(Some(found.clone()));
        }

        let Some(loaded) = repo::get_person(pool, id).await? else {
            return Ok(None);
        };

        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(loaded.id.clone())
            .or_insert_with(|| Arc::new(loaded));
        Ok(Some(entry.clone()))
    }

    /// Always a direct store read. The cache is keyed by id, and handle
    /// lookup only happens at signin, so correctness beats hit rate here.
    /// # Errors
    /// Returns an error if the store read fails.
    pub async fn get_by_handle(
        &self,
        pool: &PgPool,
        handle: &str,
    ) -> Result<Option<Person>, sqlx::Error> {
        repo::get_person_by_handle(pool, handle).await
    }

    /// Unconditionally overwrite the entry for `person.id`. Mutation paths
    /// call this after the store write commits so readers never see a stale
    /// copy of `email` or `display_name` past the mutating request.
    pub async fn put(&self, person: Person) -> Arc<Person> {
        let entry = Arc::new(person);
        let mut entries = self.entries.write().await;
        entries.insert(entry.id.clone(), entry.clone());
        debug!(entries = entries.len(), "person cache updated");
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn person(id: &str, email: Option<&str>) -> Person {
        Person {
            id: id.to_string(),
            handle: "alice".to_string(),
            password: vec![1; 64],
            salt: vec![2; 64],
            hash_lanes: 1,
            created_at_unix: 1_700_000_000,
            display_name: None,
            email: email.map(str::to_string),
        }
    }

    // A lazy pool never connects, so any test that passes with one proves the
    // lookup was served from cache alone.
    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .expect("lazy pool")
    }

    #[tokio::test]
    async fn cache_hit_skips_the_store() {
        let directory = UserDirectory::new();
        directory.put(person("p1", Some("old@example.com"))).await;

        let found = directory
            .get_by_id(&lazy_pool(), "p1")
            .await
            .expect("cache hit")
            .expect("entry");
        assert_eq!(found.email.as_deref(), Some("old@example.com"));
    }

    #[tokio::test]
    async fn put_overwrites_existing_entry() {
        let directory = UserDirectory::new();
        directory.put(person("p1", None)).await;
        directory.put(person("p1", Some("new@example.com"))).await;

        let found = directory
            .get_by_id(&lazy_pool(), "p1")
            .await
            .expect("cache hit")
            .expect("entry");
        assert_eq!(found.email.as_deref(), Some("new@example.com"));
    }

    #[tokio::test]
    async fn concurrent_readers_share_one_entry() {
        let directory = Arc::new(UserDirectory::new());
        let entry = directory.put(person("p1", None)).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let directory = directory.clone();
            let pool = lazy_pool();
            tasks.push(tokio::spawn(async move {
                directory.get_by_id(&pool, "p1").await
            }));
        }
        for task in tasks {
            let found = task.await.expect("join").expect("lookup").expect("entry");
            assert!(Arc::ptr_eq(&found, &entry));
        }
    }
}
