//! User repository
//!
//! Owns both representations of a user: the `users` row and the `user:<id>`
//! cache hash. Reads on the hot paths are served from the cache only; every
//! write runs as a two-step saga:
//!
//! 1. relational write inside an open transaction
//! 2. cache write
//!
//! The transaction commits only once step 2 succeeded. A failed cache write
//! rolls the transaction back, and a failed commit undoes the cache write.

use crate::core::auth::password::{self, DEFAULT_BCRYPT_COST, PasswordError};
use crate::core::cache::{CacheError, USER_KEY_PREFIX, UserCache, user_key};
use crate::core::db::models::{CachedUser, DEFAULT_ROLE, InsertUser, NewUser, UpdateUser, User};
use crate::core::db::store::{StoreError, UserStore, UserTransaction};

/// User repository error types
#[derive(Debug, thiserror::Error)]
pub enum UserRepositoryError {
    #[error("user not found")]
    NotFound,

    #[error("email already exists")]
    EmailAlreadyExists,

    #[error("username already exists")]
    UsernameAlreadyExists,

    #[error("phone number already exists")]
    PhoneNumberAlreadyExists,

    #[error("username or password wrong")]
    UsernameOrPasswordWrong,

    #[error("Password hashing failed: {0}")]
    HashingError(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl UserRepositoryError {
    /// Classify a failed insert/update by the column named in the error text.
    ///
    /// Checked in order email, username, phone number; anything else is
    /// returned unchanged.
    fn classify_write(err: StoreError) -> Self {
        if !matches!(err, StoreError::UniqueViolation { .. }) {
            return UserRepositoryError::Store(err);
        }

        let text = err.to_string();
        if text.contains("email") {
            UserRepositoryError::EmailAlreadyExists
        } else if text.contains("username") {
            UserRepositoryError::UsernameAlreadyExists
        } else if text.contains("phone_number") {
            UserRepositoryError::PhoneNumberAlreadyExists
        } else {
            UserRepositoryError::Store(err)
        }
    }
}

/// Cache half of a saga step, also used to express its compensation
#[derive(Debug, Clone)]
enum CacheWrite {
    Put(CachedUser),
    Remove(String),
}

impl CacheWrite {
    /// Redis command family, for log fields
    fn op(&self) -> &'static str {
        match self {
            CacheWrite::Put(_) => "set",
            CacheWrite::Remove(_) => "del",
        }
    }
}

/// Cache-backed user repository
#[derive(Clone)]
pub struct UserRepository<S, C> {
    store: S,
    cache: C,
    bcrypt_cost: u32,
}

impl<S: UserStore, C: UserCache> UserRepository<S, C> {
    /// Create a new user repository
    pub fn new(store: S, cache: C) -> Self {
        Self {
            store,
            cache,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }

    /// Set the bcrypt cost used for new passwords
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    // ========================================================================
    // Cache reads
    // ========================================================================

    /// Every user currently mirrored in the cache.
    ///
    /// There is no relational fallback: right after a cache flush this is
    /// empty until entries are written again.
    pub async fn get_all(&self) -> Result<Vec<CachedUser>, UserRepositoryError> {
        let keys = self
            .cache
            .keys_with_prefix(USER_KEY_PREFIX)
            .await
            .inspect_err(|e| tracing::error!(store = "redis", op = "get", "{}", e))?;

        let mut users = Vec::with_capacity(keys.len());
        for key in keys {
            let fields = self
                .cache
                .get_fields(&key)
                .await
                .inspect_err(|e| tracing::error!(store = "redis", op = "get", key = %key, "{}", e))?;
            users.push(CachedUser::from_fields(fields));
        }

        tracing::debug!(store = "redis", op = "get", count = users.len(), "Listed users");
        Ok(users)
    }

    /// Cached user by id
    pub async fn get_by_id(&self, id: i64) -> Result<CachedUser, UserRepositoryError> {
        // HGETALL on a missing key answers an empty hash
        let fields = self
            .cache
            .get_fields(&user_key(id))
            .await
            .inspect_err(|e| tracing::error!(store = "redis", op = "get", user_id = id, "{}", e))?;

        if fields.is_empty() {
            tracing::debug!(store = "redis", op = "get", user_id = id, "User not cached");
            return Err(UserRepositoryError::NotFound);
        }

        Ok(CachedUser::from_fields(fields))
    }

    /// Username of a cached user
    pub async fn get_username_by_id(&self, id: i64) -> Result<String, UserRepositoryError> {
        Ok(self.get_by_id(id).await?.username)
    }

    // ========================================================================
    // Write-through operations
    // ========================================================================

    /// Register a new user
    pub async fn create(&self, new_user: NewUser) -> Result<User, UserRepositoryError> {
        let password_hash = password::hash_password(&new_user.password, self.bcrypt_cost)
            .map_err(|e| {
                tracing::error!(op = "hash_password", "{}", e);
                UserRepositoryError::HashingError(e.to_string())
            })?;

        let row = InsertUser {
            firstname: new_user.firstname,
            lastname: new_user.lastname,
            biography: new_user.biography,
            username: new_user.username,
            email: new_user.email,
            phone_number: new_user.phone_number,
            password_hash,
            role: DEFAULT_ROLE.to_string(),
        };

        let mut tx = self.store.begin().await?;
        let user = match tx.insert(&row).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(store = "postgres", op = "insert", "{}", e);
                self.rollback(tx).await;
                return Err(UserRepositoryError::classify_write(e));
            }
        };

        let key = user_key(user.id);
        self.commit_with_cache(
            tx,
            CacheWrite::Put(CachedUser::from(&user)),
            CacheWrite::Remove(key),
        )
        .await?;

        tracing::info!(store = "postgres", op = "insert", user_id = user.id, "User created");
        Ok(user)
    }

    /// Update a user's profile
    pub async fn update_by_id(
        &self,
        id: i64,
        changes: UpdateUser,
    ) -> Result<User, UserRepositoryError> {
        let mut tx = self.store.begin().await?;

        let current = match tx.find_by_id(id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                tracing::debug!(store = "postgres", op = "select", user_id = id, "User not found");
                self.rollback(tx).await;
                return Err(UserRepositoryError::NotFound);
            }
            Err(e) => {
                tracing::error!(store = "postgres", op = "select", user_id = id, "{}", e);
                self.rollback(tx).await;
                return Err(e.into());
            }
        };

        let previous = CachedUser::from(&current);
        let mut user = current;
        changes.apply_to(&mut user);

        let user = match tx.save(&user).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(store = "postgres", op = "update", user_id = id, "{}", e);
                self.rollback(tx).await;
                return Err(UserRepositoryError::classify_write(e));
            }
        };

        self.commit_with_cache(
            tx,
            CacheWrite::Put(CachedUser::from(&user)),
            CacheWrite::Put(previous),
        )
        .await?;

        tracing::info!(store = "postgres", op = "update", user_id = id, "User updated");
        Ok(user)
    }

    /// Delete a user
    pub async fn delete_by_id(&self, id: i64) -> Result<(), UserRepositoryError> {
        let mut tx = self.store.begin().await?;

        let previous = match tx.find_by_id(id).await {
            Ok(Some(user)) => CachedUser::from(&user),
            Ok(None) => {
                tracing::debug!(store = "postgres", op = "delete", user_id = id, "User not found");
                self.rollback(tx).await;
                return Err(UserRepositoryError::NotFound);
            }
            Err(e) => {
                tracing::error!(store = "postgres", op = "select", user_id = id, "{}", e);
                self.rollback(tx).await;
                return Err(e.into());
            }
        };

        match tx.delete(id).await {
            Ok(true) => {}
            Ok(false) => {
                self.rollback(tx).await;
                return Err(UserRepositoryError::NotFound);
            }
            Err(e) => {
                tracing::error!(store = "postgres", op = "delete", user_id = id, "{}", e);
                self.rollback(tx).await;
                return Err(e.into());
            }
        }

        self.commit_with_cache(tx, CacheWrite::Remove(user_key(id)), CacheWrite::Put(previous))
            .await?;

        tracing::info!(store = "postgres", op = "delete", user_id = id, "User deleted");
        Ok(())
    }

    /// Authenticate a user by username and password.
    ///
    /// Looks the row up in the relational store, then refreshes the cache
    /// entry. A failed refresh is logged and does not fail the login.
    pub async fn verify(&self, username: &str, password: &str) -> Result<User, UserRepositoryError> {
        let user = self
            .store
            .find_by_username(username)
            .await
            .inspect_err(|e| tracing::error!(store = "postgres", op = "select", "{}", e))?
            .ok_or_else(|| {
                tracing::debug!(store = "postgres", op = "verify", "Unknown username");
                UserRepositoryError::NotFound
            })?;

        password::check_password(password, &user.password_hash).map_err(|e| match e {
            PasswordError::Mismatch => {
                tracing::debug!(op = "verify", user_id = user.id, "Password mismatch");
                UserRepositoryError::UsernameOrPasswordWrong
            }
            PasswordError::Hashing(msg) => {
                tracing::error!(op = "verify", user_id = user.id, "{}", msg);
                UserRepositoryError::HashingError(msg)
            }
        })?;

        if let Err(e) = self.apply(&CacheWrite::Put(CachedUser::from(&user))).await {
            tracing::warn!(store = "redis", op = "set", user_id = user.id, "Cache refresh failed: {}", e);
        }

        tracing::info!(op = "verify", user_id = user.id, "User verified");
        Ok(user)
    }

    // ========================================================================
    // Saga plumbing
    // ========================================================================

    async fn apply(&self, write: &CacheWrite) -> Result<(), CacheError> {
        match write {
            CacheWrite::Put(user) => {
                self.cache
                    .set_fields(&user_key(&user.id), &user.to_fields())
                    .await
            }
            CacheWrite::Remove(key) => self.cache.delete(key).await,
        }
    }

    /// Run the cache step, then commit. `undo` reverts the cache step if the
    /// commit fails.
    async fn commit_with_cache(
        &self,
        tx: S::Tx,
        write: CacheWrite,
        undo: CacheWrite,
    ) -> Result<(), UserRepositoryError> {
        if let Err(e) = self.apply(&write).await {
            tracing::error!(store = "redis", op = write.op(), "{}", e);
            self.rollback(tx).await;
            return Err(e.into());
        }

        if let Err(e) = tx.commit().await {
            tracing::error!(store = "postgres", op = "commit", "{}", e);
            if let Err(undo_err) = self.apply(&undo).await {
                tracing::warn!(
                    store = "redis",
                    op = undo.op(),
                    step = "compensate",
                    "Cache left ahead of database: {}",
                    undo_err
                );
            }
            return Err(e.into());
        }

        Ok(())
    }

    async fn rollback(&self, tx: S::Tx) {
        match tx.rollback().await {
            Ok(()) => tracing::debug!(store = "postgres", op = "rollback", "Transaction rolled back"),
            Err(e) => tracing::error!(store = "postgres", op = "rollback", "{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::core::cache::MemoryUserCache;
    use crate::core::db::memory::MemoryUserTransaction;
    use crate::core::db::MemoryUserStore;

    // ========================================================================
    // Test doubles
    // ========================================================================

    /// Memory cache whose writes can be made to fail
    #[derive(Clone, Default)]
    struct FlakyCache {
        inner: MemoryUserCache,
        fail_writes: Arc<AtomicBool>,
        fail_reads: Arc<AtomicBool>,
        always_exists: Arc<AtomicBool>,
    }

    impl FlakyCache {
        /// Make `exists` answer true for every key, as a key deleted right
        /// after the check would
        fn always_exists(&self, on: bool) {
            self.always_exists.store(on, Ordering::SeqCst);
        }

        fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        fn fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        fn check(flag: &AtomicBool) -> Result<(), CacheError> {
            if flag.load(Ordering::SeqCst) {
                Err(CacheError::Unavailable("injected failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl UserCache for FlakyCache {
        async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
            Self::check(&self.fail_reads)?;
            self.inner.keys_with_prefix(prefix).await
        }

        async fn exists(&self, key: &str) -> Result<bool, CacheError> {
            Self::check(&self.fail_reads)?;
            if self.always_exists.load(Ordering::SeqCst) {
                return Ok(true);
            }
            self.inner.exists(key).await
        }

        async fn get_fields(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
            Self::check(&self.fail_reads)?;
            self.inner.get_fields(key).await
        }

        async fn set_fields(
            &self,
            key: &str,
            fields: &[(&'static str, String)],
        ) -> Result<(), CacheError> {
            Self::check(&self.fail_writes)?;
            self.inner.set_fields(key, fields).await
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            Self::check(&self.fail_writes)?;
            self.inner.delete(key).await
        }
    }

    /// Memory store whose commits can be made to fail
    #[derive(Clone, Default)]
    struct FailingCommitStore {
        inner: MemoryUserStore,
        fail_commit: Arc<AtomicBool>,
    }

    impl FailingCommitStore {
        fn fail_commit(&self, fail: bool) {
            self.fail_commit.store(fail, Ordering::SeqCst);
        }
    }

    struct FailingCommitTransaction {
        inner: MemoryUserTransaction,
        fail_commit: bool,
    }

    impl UserStore for FailingCommitStore {
        type Tx = FailingCommitTransaction;

        async fn begin(&self) -> Result<FailingCommitTransaction, StoreError> {
            Ok(FailingCommitTransaction {
                inner: self.inner.begin().await?,
                fail_commit: self.fail_commit.load(Ordering::SeqCst),
            })
        }

        async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_by_username(username).await
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            self.inner.health_check().await
        }
    }

    impl UserTransaction for FailingCommitTransaction {
        async fn insert(&mut self, user: &InsertUser) -> Result<User, StoreError> {
            self.inner.insert(user).await
        }

        async fn find_by_id(&mut self, id: i64) -> Result<Option<User>, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn save(&mut self, user: &User) -> Result<User, StoreError> {
            self.inner.save(user).await
        }

        async fn delete(&mut self, id: i64) -> Result<bool, StoreError> {
            self.inner.delete(id).await
        }

        async fn commit(self) -> Result<(), StoreError> {
            if self.fail_commit {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.commit().await
        }

        async fn rollback(self) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    fn failing_commit_repository() -> UserRepository<FailingCommitStore, MemoryUserCache> {
        UserRepository::new(FailingCommitStore::default(), MemoryUserCache::new())
            .with_bcrypt_cost(4)
    }

    fn repository() -> UserRepository<MemoryUserStore, FlakyCache> {
        UserRepository::new(MemoryUserStore::new(), FlakyCache::default()).with_bcrypt_cost(4)
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            firstname: format!("{name}-first"),
            lastname: format!("{name}-last"),
            biography: format!("{name} writes about Rust"),
            username: name.to_string(),
            password: format!("{name}-Password1"),
            email: format!("{name}@example.com"),
            phone_number: format!("+1-555-{name}"),
        }
    }

    // ========================================================================
    // Create
    // ========================================================================

    #[tokio::test]
    async fn test_create_then_get_by_id_mirrors_fields() {
        let repo = repository();
        let input = new_user("ada");

        let user = repo.create(input.clone()).await.unwrap();
        let cached = repo.get_by_id(user.id).await.unwrap();

        assert_eq!(cached.id, user.id.to_string());
        assert_eq!(cached.firstname, input.firstname);
        assert_eq!(cached.lastname, input.lastname);
        assert_eq!(cached.biography, input.biography);
        assert_eq!(cached.username, input.username);
        assert_eq!(cached.email, input.email);
        assert_eq!(cached.phone_number, input.phone_number);
        assert_eq!(cached.role, DEFAULT_ROLE);
    }

    #[tokio::test]
    async fn test_create_hashes_password() {
        let repo = repository();

        let user = repo.create(new_user("ada")).await.unwrap();

        assert_ne!(user.password_hash, "ada-Password1");
        assert!(password::check_password("ada-Password1", &user.password_hash).is_ok());
        let fields = repo.cache().inner.get_fields(&user_key(user.id)).await.unwrap();
        assert!(fields.values().all(|v| v != &user.password_hash));
    }

    #[tokio::test]
    async fn test_create_duplicate_username_rolls_back() {
        let repo = repository();
        repo.create(new_user("ada")).await.unwrap();

        let mut dup = new_user("grace");
        dup.username = "ada".to_string();
        let result = repo.create(dup).await;

        assert!(matches!(result, Err(UserRepositoryError::UsernameAlreadyExists)));
        assert_eq!(repo.store().count().await, 1);
        assert_eq!(repo.cache().inner.len(), 1);
        assert!(repo.store().get(2).await.is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_email_and_phone_are_distinguished() {
        let repo = repository();
        repo.create(new_user("ada")).await.unwrap();

        let mut dup_email = new_user("grace");
        dup_email.email = "ada@example.com".to_string();
        assert!(matches!(
            repo.create(dup_email).await,
            Err(UserRepositoryError::EmailAlreadyExists)
        ));

        let mut dup_phone = new_user("linus");
        dup_phone.phone_number = "+1-555-ada".to_string();
        assert!(matches!(
            repo.create(dup_phone).await,
            Err(UserRepositoryError::PhoneNumberAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_create_all_duplicates_reports_email_first() {
        let repo = repository();
        repo.create(new_user("ada")).await.unwrap();

        let result = repo.create(new_user("ada")).await;
        assert!(matches!(result, Err(UserRepositoryError::EmailAlreadyExists)));
    }

    #[tokio::test]
    async fn test_create_cache_failure_rolls_back_insert() {
        let repo = repository();
        repo.cache().fail_writes(true);

        let result = repo.create(new_user("ada")).await;

        assert!(matches!(result, Err(UserRepositoryError::Cache(_))));
        assert_eq!(repo.store().count().await, 0);
        assert!(repo.store().find_by_username("ada").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_bcrypt_cost() {
        let repo = UserRepository::new(MemoryUserStore::new(), FlakyCache::default())
            .with_bcrypt_cost(1);

        let result = repo.create(new_user("ada")).await;
        assert!(matches!(result, Err(UserRepositoryError::HashingError(_))));
        assert_eq!(repo.store().count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_of_same_user_admit_one() {
        let repo = repository();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.create(new_user("ada")).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, UserRepositoryError::EmailAlreadyExists)),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(repo.store().count().await, 1);
        assert_eq!(repo.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_get_distinct_ids() {
        let repo = repository();

        let handles: Vec<_> = ["ada", "grace", "linus", "barbara"]
            .into_iter()
            .map(|name| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.create(new_user(name)).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.sort();
        ids.dedup();

        assert_eq!(ids.len(), 4);
        assert_eq!(repo.store().count().await, 4);
        assert_eq!(repo.get_all().await.unwrap().len(), 4);
    }

    // ========================================================================
    // Reads
    // ========================================================================

    #[tokio::test]
    async fn test_get_by_id_missing() {
        let repo = repository();

        assert!(matches!(
            repo.get_by_id(99).await,
            Err(UserRepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_get_by_id_key_gone_after_exists_is_not_found() {
        let repo = repository();
        let user = repo.create(new_user("ada")).await.unwrap();
        repo.cache().inner.flush();
        repo.cache().always_exists(true);

        assert!(matches!(
            repo.get_by_id(user.id).await,
            Err(UserRepositoryError::NotFound)
        ));
        assert!(matches!(
            repo.get_username_by_id(user.id).await,
            Err(UserRepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_get_by_id_propagates_cache_errors() {
        let repo = repository();
        let user = repo.create(new_user("ada")).await.unwrap();
        repo.cache().fail_reads(true);

        assert!(matches!(
            repo.get_by_id(user.id).await,
            Err(UserRepositoryError::Cache(_))
        ));
    }

    #[tokio::test]
    async fn test_get_all_lists_cached_users() {
        let repo = repository();
        repo.create(new_user("ada")).await.unwrap();
        repo.create(new_user("grace")).await.unwrap();

        let mut names: Vec<String> = repo
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        names.sort();

        assert_eq!(names, vec!["ada".to_string(), "grace".to_string()]);
    }

    #[tokio::test]
    async fn test_get_all_is_empty_after_cache_flush() {
        let repo = repository();
        let user = repo.create(new_user("ada")).await.unwrap();

        repo.cache().inner.flush();

        assert!(repo.get_all().await.unwrap().is_empty());
        assert!(matches!(
            repo.get_by_id(user.id).await,
            Err(UserRepositoryError::NotFound)
        ));
        assert_eq!(repo.store().count().await, 1);
    }

    #[tokio::test]
    async fn test_get_all_propagates_cache_errors() {
        let repo = repository();
        repo.cache().fail_reads(true);

        assert!(matches!(
            repo.get_all().await,
            Err(UserRepositoryError::Cache(_))
        ));
    }

    #[tokio::test]
    async fn test_get_username_by_id() {
        let repo = repository();
        let user = repo.create(new_user("ada")).await.unwrap();

        assert_eq!(repo.get_username_by_id(user.id).await.unwrap(), "ada");
        assert!(matches!(
            repo.get_username_by_id(user.id + 1).await,
            Err(UserRepositoryError::NotFound)
        ));
    }

    // ========================================================================
    // Update
    // ========================================================================

    #[tokio::test]
    async fn test_update_by_id_overwrites_cache() {
        let repo = repository();
        let user = repo.create(new_user("ada")).await.unwrap();

        let updated = repo
            .update_by_id(
                user.id,
                UpdateUser {
                    biography: Some("Countess of Lovelace".to_string()),
                    username: Some("countess".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.username, "countess");
        let cached = repo.get_by_id(user.id).await.unwrap();
        assert_eq!(cached.username, "countess");
        assert_eq!(cached.biography, "Countess of Lovelace");
        assert_eq!(cached.email, "ada@example.com");
        assert_eq!(repo.store().get(user.id).await.unwrap().username, "countess");
    }

    #[tokio::test]
    async fn test_update_missing_user_leaves_cache_untouched() {
        let repo = repository();
        let user = repo.create(new_user("ada")).await.unwrap();
        let before = repo.get_all().await.unwrap();

        let result = repo
            .update_by_id(
                user.id + 100,
                UpdateUser {
                    firstname: Some("Nobody".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(UserRepositoryError::NotFound)));
        assert_eq!(repo.get_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_update_cache_failure_rolls_back_save() {
        let repo = repository();
        let user = repo.create(new_user("ada")).await.unwrap();
        repo.cache().fail_writes(true);

        let result = repo
            .update_by_id(
                user.id,
                UpdateUser {
                    lastname: Some("Byron".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(UserRepositoryError::Cache(_))));
        assert_eq!(repo.store().get(user.id).await.unwrap().lastname, "ada-last");
        repo.cache().fail_writes(false);
        assert_eq!(repo.get_by_id(user.id).await.unwrap().lastname, "ada-last");
    }

    #[tokio::test]
    async fn test_update_to_taken_username_is_classified() {
        let repo = repository();
        repo.create(new_user("ada")).await.unwrap();
        let grace = repo.create(new_user("grace")).await.unwrap();

        let result = repo
            .update_by_id(
                grace.id,
                UpdateUser {
                    username: Some("ada".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(UserRepositoryError::UsernameAlreadyExists)));
        assert_eq!(repo.get_by_id(grace.id).await.unwrap().username, "grace");
    }

    // ========================================================================
    // Delete
    // ========================================================================

    #[tokio::test]
    async fn test_delete_then_get_by_id_not_found() {
        let repo = repository();
        let user = repo.create(new_user("ada")).await.unwrap();

        repo.delete_by_id(user.id).await.unwrap();

        assert!(matches!(
            repo.get_by_id(user.id).await,
            Err(UserRepositoryError::NotFound)
        ));
        assert_eq!(repo.store().count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_missing_user() {
        let repo = repository();

        assert!(matches!(
            repo.delete_by_id(1).await,
            Err(UserRepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_cache_failure_rolls_back() {
        let repo = repository();
        let user = repo.create(new_user("ada")).await.unwrap();
        repo.cache().fail_writes(true);

        let result = repo.delete_by_id(user.id).await;

        assert!(matches!(result, Err(UserRepositoryError::Cache(_))));
        assert!(repo.store().get(user.id).await.is_some());
        assert!(repo.get_by_id(user.id).await.is_ok());
    }

    // ========================================================================
    // Commit failures
    // ========================================================================

    #[tokio::test]
    async fn test_create_commit_failure_removes_cache_entry() {
        let repo = failing_commit_repository();
        repo.store().fail_commit(true);

        let result = repo.create(new_user("ada")).await;

        assert!(matches!(result, Err(UserRepositoryError::Store(_))));
        assert_eq!(repo.store().inner.count().await, 0);
        assert_eq!(repo.cache().len(), 0);
        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_commit_failure_restores_cache_entry() {
        let repo = failing_commit_repository();
        let user = repo.create(new_user("ada")).await.unwrap();
        let before = repo.get_by_id(user.id).await.unwrap();
        repo.store().fail_commit(true);

        let result = repo
            .update_by_id(
                user.id,
                UpdateUser {
                    username: Some("countess".to_string()),
                    biography: Some("Countess of Lovelace".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(UserRepositoryError::Store(_))));
        assert_eq!(repo.get_by_id(user.id).await.unwrap(), before);
        assert_eq!(repo.store().inner.get(user.id).await.unwrap().username, "ada");
    }

    #[tokio::test]
    async fn test_delete_commit_failure_restores_cache_entry() {
        let repo = failing_commit_repository();
        let user = repo.create(new_user("ada")).await.unwrap();
        let before = repo.get_by_id(user.id).await.unwrap();
        repo.store().fail_commit(true);

        let result = repo.delete_by_id(user.id).await;

        assert!(matches!(result, Err(UserRepositoryError::Store(_))));
        assert_eq!(repo.get_by_id(user.id).await.unwrap(), before);
        assert!(repo.store().inner.get(user.id).await.is_some());
    }

    #[test]
    fn test_cache_write_log_op() {
        assert_eq!(CacheWrite::Put(CachedUser::from_fields(HashMap::new())).op(), "set");
        assert_eq!(CacheWrite::Remove(user_key(1)).op(), "del");
    }

    // ========================================================================
    // Verify
    // ========================================================================

    #[tokio::test]
    async fn test_verify_refreshes_cache() {
        let repo = repository();
        let user = repo.create(new_user("ada")).await.unwrap();
        repo.cache().inner.flush();

        let verified = repo.verify("ada", "ada-Password1").await.unwrap();

        assert_eq!(verified.id, user.id);
        assert_eq!(repo.get_by_id(user.id).await.unwrap().username, "ada");
    }

    #[tokio::test]
    async fn test_verify_wrong_password_leaves_cache_unchanged() {
        let repo = repository();
        let user = repo.create(new_user("ada")).await.unwrap();
        let before = repo.get_by_id(user.id).await.unwrap();

        let result = repo.verify("ada", "not-the-password").await;

        assert!(matches!(result, Err(UserRepositoryError::UsernameOrPasswordWrong)));
        assert_eq!(repo.get_by_id(user.id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_verify_unknown_username() {
        let repo = repository();

        assert!(matches!(
            repo.verify("ghost", "whatever").await,
            Err(UserRepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_verify_succeeds_when_cache_refresh_fails() {
        let repo = repository();
        repo.create(new_user("ada")).await.unwrap();
        repo.cache().fail_writes(true);

        assert!(repo.verify("ada", "ada-Password1").await.is_ok());
    }

    // ========================================================================
    // Error classification
    // ========================================================================

    #[test]
    fn test_classify_write_priority() {
        let violation = |constraint: &str| StoreError::UniqueViolation {
            constraint: constraint.to_string(),
        };

        assert!(matches!(
            UserRepositoryError::classify_write(violation("users_email_key")),
            UserRepositoryError::EmailAlreadyExists
        ));
        assert!(matches!(
            UserRepositoryError::classify_write(violation("users_username_key")),
            UserRepositoryError::UsernameAlreadyExists
        ));
        assert!(matches!(
            UserRepositoryError::classify_write(violation("users_phone_number_key")),
            UserRepositoryError::PhoneNumberAlreadyExists
        ));
        assert!(matches!(
            UserRepositoryError::classify_write(violation("users_pkey")),
            UserRepositoryError::Store(StoreError::UniqueViolation { .. })
        ));
        assert!(matches!(
            UserRepositoryError::classify_write(StoreError::Database(sqlx::Error::RowNotFound)),
            UserRepositoryError::Store(StoreError::Database(_))
        ));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(UserRepositoryError::NotFound.to_string(), "user not found");
        assert_eq!(
            UserRepositoryError::UsernameOrPasswordWrong.to_string(),
            "username or password wrong"
        );
    }
}
