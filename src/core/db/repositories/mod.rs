//! Database repositories
//!
//! Repositories encapsulate data access and keep the relational store and
//! the cache consistent, so handlers never touch either directly.

pub mod user;

pub use user::{UserRepository, UserRepositoryError};
