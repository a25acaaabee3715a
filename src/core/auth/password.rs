//! Password hashing and verification
//!
//! Passwords are stored only as bcrypt hashes (salt embedded in the hash).

/// Cost factor for bcrypt hashing (12 is recommended for production)
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Password errors
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Password does not match")]
    Mismatch,
}

/// Hash a password using bcrypt with automatic salt generation
pub fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    bcrypt::hash(password, cost).map_err(|e| PasswordError::Hashing(e.to_string()))
}

/// Verify a password against a bcrypt hash
pub fn check_password(password: &str, hash: &str) -> Result<(), PasswordError> {
    let is_valid =
        bcrypt::verify(password, hash).map_err(|e| PasswordError::Hashing(e.to_string()))?;

    if is_valid {
        Ok(())
    } else {
        Err(PasswordError::Mismatch)
    }
}
