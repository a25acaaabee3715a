//! In-process user store
//!
//! Keeps the `users` table in memory with the same unique constraints as the
//! PostgreSQL schema. Transactions are serialized: `begin` takes the writer
//! lock and holds it until commit or rollback, and works on a private copy
//! of the table that replaces the shared one on commit. Reads outside a
//! transaction see committed rows only and never wait on a writer. Used by
//! tests and by the server when no `DATABASE_URL` is set.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::db::models::{InsertUser, User};
use crate::core::db::store::{StoreError, UserStore, UserTransaction};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<i64, User>,
    next_id: i64,
}

impl Table {
    /// Check the unique columns of `candidate` against every other row
    fn check_unique(&self, candidate: &User) -> Result<(), StoreError> {
        for row in self.rows.values().filter(|row| row.id != candidate.id) {
            let constraint = if row.email == candidate.email {
                "users_email_key"
            } else if row.username == candidate.username {
                "users_username_key"
            } else if row.phone_number == candidate.phone_number {
                "users_phone_number_key"
            } else {
                continue;
            };
            return Err(StoreError::UniqueViolation {
                constraint: constraint.to_string(),
            });
        }
        Ok(())
    }
}

/// Memory-backed user store
#[derive(Clone, Default)]
pub struct MemoryUserStore {
    table: Arc<Mutex<Table>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryUserStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed rows
    pub async fn count(&self) -> usize {
        self.table.lock().await.rows.len()
    }

    /// Committed row by id
    pub async fn get(&self, id: i64) -> Option<User> {
        self.table.lock().await.rows.get(&id).cloned()
    }
}

impl UserStore for MemoryUserStore {
    type Tx = MemoryUserTransaction;

    async fn begin(&self) -> Result<MemoryUserTransaction, StoreError> {
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let staged = self.table.lock().await.clone();
        Ok(MemoryUserTransaction {
            table: Arc::clone(&self.table),
            staged,
            _writer: writer,
        })
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .rows
            .values()
            .find(|row| row.username == username)
            .cloned())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Open in-memory transaction. Other transactions wait in `begin` until
/// this one is committed, rolled back or dropped.
pub struct MemoryUserTransaction {
    table: Arc<Mutex<Table>>,
    staged: Table,
    _writer: OwnedMutexGuard<()>,
}

impl UserTransaction for MemoryUserTransaction {
    async fn insert(&mut self, user: &InsertUser) -> Result<User, StoreError> {
        let now = Utc::now();
        let row = User {
            id: self.staged.next_id + 1,
            firstname: user.firstname.clone(),
            lastname: user.lastname.clone(),
            biography: user.biography.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            phone_number: user.phone_number.clone(),
            password_hash: user.password_hash.clone(),
            role: user.role.clone(),
            created_at: now,
            updated_at: now,
        };

        self.staged.check_unique(&row)?;
        self.staged.next_id = row.id;
        self.staged.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&mut self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.staged.rows.get(&id).cloned())
    }

    async fn save(&mut self, user: &User) -> Result<User, StoreError> {
        if !self.staged.rows.contains_key(&user.id) {
            return Err(StoreError::Database(sqlx::Error::RowNotFound));
        }

        let mut row = user.clone();
        row.updated_at = Utc::now();
        self.staged.check_unique(&row)?;
        self.staged.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn delete(&mut self, id: i64) -> Result<bool, StoreError> {
        Ok(self.staged.rows.remove(&id).is_some())
    }

    async fn commit(self) -> Result<(), StoreError> {
        *self.table.lock().await = self.staged;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
