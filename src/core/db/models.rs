//! Database models for the blog accounts backend
//!
//! This module defines the entity structs that map to PostgreSQL tables and
//! the cache-side projection of a user.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role assigned to newly created users
pub const DEFAULT_ROLE: &str = "user";

// ============================================================================
// User Model
// ============================================================================

/// User entity representing a registered account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub firstname: String,
    pub lastname: String,
    pub biography: String,
    pub username: String,
    pub email: String,
    pub phone_number: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Account data submitted at registration (plain text password)
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub firstname: String,
    pub lastname: String,
    #[serde(default)]
    pub biography: String,
    pub username: String,
    pub password: String,
    pub email: String,
    pub phone_number: String,
}

/// Row data for insertion (password already hashed)
#[derive(Debug, Clone)]
pub struct InsertUser {
    pub firstname: String,
    pub lastname: String,
    pub biography: String,
    pub username: String,
    pub email: String,
    pub phone_number: String,
    pub password_hash: String,
    pub role: String,
}

/// Profile changes; `None` leaves the column untouched
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateUser {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub biography: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl UpdateUser {
    /// Apply the changes to a loaded row
    pub fn apply_to(self, user: &mut User) {
        if let Some(firstname) = self.firstname {
            user.firstname = firstname;
        }
        if let Some(lastname) = self.lastname {
            user.lastname = lastname;
        }
        if let Some(biography) = self.biography {
            user.biography = biography;
        }
        if let Some(username) = self.username {
            user.username = username;
        }
        if let Some(email) = self.email {
            user.email = email;
        }
        if let Some(phone_number) = self.phone_number {
            user.phone_number = phone_number;
        }
    }
}

// ============================================================================
// Cache Projection
// ============================================================================

/// Cache-side mirror of a user, stored as a hash under `user:<id>`.
///
/// Never contains the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUser {
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub biography: String,
    pub username: String,
    pub email: String,
    #[serde(rename = "phonenumber")]
    pub phone_number: String,
    pub role: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

impl CachedUser {
    /// Hash fields as written to the cache
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.clone()),
            ("firstname", self.firstname.clone()),
            ("lastname", self.lastname.clone()),
            ("biography", self.biography.clone()),
            ("username", self.username.clone()),
            ("email", self.email.clone()),
            ("phonenumber", self.phone_number.clone()),
            ("role", self.role.clone()),
            ("createdAt", self.created_at.clone()),
            ("updatedAt", self.updated_at.clone()),
        ]
    }

    /// Rebuild from a cache hash. Missing fields read as empty strings.
    pub fn from_fields(mut fields: HashMap<String, String>) -> Self {
        let mut take = |name: &str| fields.remove(name).unwrap_or_default();

        Self {
            id: take("id"),
            firstname: take("firstname"),
            lastname: take("lastname"),
            biography: take("biography"),
            username: take("username"),
            email: take("email"),
            phone_number: take("phonenumber"),
            role: take("role"),
            created_at: take("createdAt"),
            updated_at: take("updatedAt"),
        }
    }
}

impl From<&User> for CachedUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            firstname: user.firstname.clone(),
            lastname: user.lastname.clone(),
            biography: user.biography.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            phone_number: user.phone_number.clone(),
            role: user.role.clone(),
            created_at: user.created_at.to_rfc3339(),
            updated_at: user.updated_at.to_rfc3339(),
        }
    }
}
