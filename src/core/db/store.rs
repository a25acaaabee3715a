//! Transactional access to the `users` table
//!
//! The repository talks to the relational store only through [`UserStore`]
//! and [`UserTransaction`], so the write-through saga can hold a transaction
//! open while it writes the cache and decide afterwards whether to commit.

use std::future::Future;

use sqlx::{PgPool, Postgres, Transaction};

use crate::core::db::models::{InsertUser, User};

/// Relational store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint rejected the write. The text names the constraint
    /// (e.g. `users_email_key`), which is what callers classify on.
    #[error("duplicate key value violates unique constraint \"{constraint}\"")]
    UniqueViolation { constraint: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Map a sqlx error, lifting unique violations into their own variant
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            let constraint = db_err
                .constraint()
                .map(str::to_string)
                .unwrap_or_else(|| db_err.message().to_string());
            return StoreError::UniqueViolation { constraint };
        }
        StoreError::Database(err)
    }
}

/// Entry point to the relational user table
pub trait UserStore: Clone + Send + Sync + 'static {
    type Tx: UserTransaction;

    /// Open a transaction
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;

    /// Look a user up by username outside of any transaction
    fn find_by_username(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Check that the store answers queries
    fn health_check(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Open transaction over the user table. Dropping it without calling
/// [`commit`](UserTransaction::commit) discards every change.
pub trait UserTransaction: Send {
    fn insert(&mut self, user: &InsertUser)
    -> impl Future<Output = Result<User, StoreError>> + Send;

    fn find_by_id(&mut self, id: i64)
    -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Persist every mutable column of `user`, bumping `updated_at`
    fn save(&mut self, user: &User) -> impl Future<Output = Result<User, StoreError>> + Send;

    /// Delete a row, returning whether it existed
    fn delete(&mut self, id: i64) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

// ============================================================================
// PostgreSQL
// ============================================================================

const USER_COLUMNS: &str = "id, firstname, lastname, biography, username, email, phone_number, \
                            password_hash, role, created_at, updated_at";

/// PostgreSQL-backed user store
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Create a new store over a connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UserStore for PgUserStore {
    type Tx = PgUserTransaction;

    async fn begin(&self) -> Result<PgUserTransaction, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgUserTransaction { tx })
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Open PostgreSQL transaction
pub struct PgUserTransaction {
    tx: Transaction<'static, Postgres>,
}

impl UserTransaction for PgUserTransaction {
    async fn insert(&mut self, user: &InsertUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (firstname, lastname, biography, username, email, phone_number, password_hash, role)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.firstname)
        .bind(&user.lastname)
        .bind(&user.biography)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.phone_number)
        .bind(&user.password_hash)
        .bind(&user.role)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn find_by_id(&mut self, id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(user)
    }

    async fn save(&mut self, user: &User) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET
                firstname = $2,
                lastname = $3,
                biography = $4,
                username = $5,
                email = $6,
                phone_number = $7,
                password_hash = $8,
                role = $9,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.firstname)
        .bind(&user.lastname)
        .bind(&user.biography)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.phone_number)
        .bind(&user.password_hash)
        .bind(&user.role)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn delete(&mut self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_display_names_constraint() {
        let err = StoreError::UniqueViolation {
            constraint: "users_phone_number_key".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "duplicate key value violates unique constraint \"users_phone_number_key\""
        );
    }

    #[test]
    fn test_from_sqlx_keeps_non_database_errors() {
        let err = StoreError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(sqlx::Error::RowNotFound)));
    }

    // These tests are marked with #[ignore] as they require a running database
    // Run with: cargo test -- --ignored

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_pg_transaction_rollback_discards_insert() {
        use crate::core::db::{DbConfig, create_pool_with_migrations};

        let config = DbConfig::from_env().expect("DATABASE_URL must be set");
        let pool = create_pool_with_migrations(&config)
            .await
            .expect("Failed to create pool");
        let store = PgUserStore::new(pool);

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let mut tx = store.begin().await.unwrap();
        tx.insert(&InsertUser {
            firstname: "Roll".to_string(),
            lastname: "Back".to_string(),
            biography: String::new(),
            username: format!("rb_{suffix}"),
            email: format!("rb_{suffix}@example.com"),
            phone_number: suffix.clone(),
            password_hash: "x".to_string(),
            role: "user".to_string(),
        })
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        let found = store.find_by_username(&format!("rb_{suffix}")).await.unwrap();
        assert!(found.is_none());
    }
}
