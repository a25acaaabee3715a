//! Database module for the blog accounts backend
//!
//! This module provides database connectivity, models, and repositories
//! for persistent storage using PostgreSQL and SQLx.

pub mod memory;
pub mod models;
pub mod pool;
pub mod repositories;
pub mod store;

// Re-export commonly used items
pub use memory::MemoryUserStore;
pub use models::*;
pub use pool::{DbConfig, DbError, create_pool, create_pool_with_migrations, run_migrations};
pub use repositories::{UserRepository, UserRepositoryError};
pub use store::{PgUserStore, StoreError, UserStore, UserTransaction};

// Re-export sqlx types that might be needed
pub use sqlx::PgPool;
