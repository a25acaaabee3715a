//! JWT utilities for session token issuance and validation
//!
//! Tokens are HS256-signed and carry the user id, role and username.
//! Access tokens live for an hour by default, refresh tokens for a week.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default access token expiration time (60 minutes, matches the cookie max-age)
pub const ACCESS_TOKEN_EXPIRATION_MINUTES: i64 = 60;

/// Default refresh token expiration time (7 days)
pub const REFRESH_TOKEN_EXPIRATION_DAYS: i64 = 7;

/// Default token issuer
pub const DEFAULT_ISSUER: &str = "blog";

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret key for signing tokens
    pub secret: String,
    /// Access token expiration in minutes
    pub access_token_expiration_minutes: i64,
    /// Refresh token expiration in days
    pub refresh_token_expiration_days: i64,
    /// Token issuer
    pub issuer: String,
}

impl JwtConfig {
    /// Create a new JWT configuration
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_token_expiration_minutes: ACCESS_TOKEN_EXPIRATION_MINUTES,
            refresh_token_expiration_days: REFRESH_TOKEN_EXPIRATION_DAYS,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Set access token expiration
    pub fn access_token_expiration(mut self, minutes: i64) -> Self {
        self.access_token_expiration_minutes = minutes;
        self
    }

    /// Set refresh token expiration
    pub fn refresh_token_expiration(mut self, days: i64) -> Self {
        self.refresh_token_expiration_days = days;
        self
    }

    /// Set issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field(
                "access_token_expiration_minutes",
                &self.access_token_expiration_minutes,
            )
            .field(
                "refresh_token_expiration_days",
                &self.refresh_token_expiration_days,
            )
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// JWT errors
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token signing failed: {0}")]
    Signing(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Wrong token kind: expected {expected}, got {actual}")]
    WrongTokenKind {
        expected: TokenType,
        actual: TokenType,
    },
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        let reason = match err.kind() {
            ErrorKind::ExpiredSignature => "token expired".to_string(),
            ErrorKind::InvalidSignature => "signature mismatch".to_string(),
            ErrorKind::InvalidIssuer => "unexpected issuer".to_string(),
            _ => err.to_string(),
        };
        JwtError::InvalidToken(reason)
    }
}

/// Token class. A token issued for one class is never accepted as another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Access => write!(f, "access"),
            TokenType::Refresh => write!(f, "refresh"),
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// User role
    pub role: String,
    /// Username
    pub username: String,
    /// Token type (access or refresh)
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// JWT ID (unique identifier for this token)
    pub jti: String,
}

impl Claims {
    /// Get the user ID
    pub fn user_id(&self) -> Result<i64, JwtError> {
        self.sub
            .parse()
            .map_err(|_| JwtError::InvalidToken(format!("subject '{}' is not a user id", self.sub)))
    }
}

/// JWT service for token operations
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    /// Create a new JWT service
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Access token lifetime in seconds
    pub fn access_token_lifetime_secs(&self) -> i64 {
        self.config.access_token_expiration_minutes * 60
    }

    /// Issue an access token, returning it with its expiry timestamp
    pub fn create_token(
        &self,
        user_id: i64,
        role: &str,
        username: &str,
    ) -> Result<(String, i64), JwtError> {
        let lifetime = Duration::minutes(self.config.access_token_expiration_minutes);
        self.sign(user_id, role, username, TokenType::Access, lifetime)
    }

    /// Issue a refresh token, returning it with its expiry timestamp
    pub fn create_refresh_token(
        &self,
        user_id: i64,
        role: &str,
        username: &str,
    ) -> Result<(String, i64), JwtError> {
        let lifetime = Duration::days(self.config.refresh_token_expiration_days);
        self.sign(user_id, role, username, TokenType::Refresh, lifetime)
    }

    fn sign(
        &self,
        user_id: i64,
        role: &str,
        username: &str,
        token_type: TokenType,
        lifetime: Duration,
    ) -> Result<(String, i64), JwtError> {
        let now = Utc::now();
        let exp = now + lifetime;

        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            username: username.to_string(),
            token_type,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Signing(e.to_string()))?;

        Ok((token, exp.timestamp()))
    }

    /// Validate and decode a token of any class
    pub fn parse_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.issuer]);
        validation.leeway = 0;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)?;

        Ok(token_data.claims)
    }

    /// Validate a token and require it to be of the given class
    pub fn decode_token(&self, token: &str, expected: TokenType) -> Result<Claims, JwtError> {
        let claims = self.parse_token(token)?;

        if claims.token_type != expected {
            return Err(JwtError::WrongTokenKind {
                expected,
                actual: claims.token_type,
            });
        }

        Ok(claims)
    }

    /// Invalidate a token on the server side.
    ///
    /// No revocation list is kept: the token remains cryptographically valid
    /// until its `exp`, so callers must also drop the client copy.
    pub fn destroy(&self, token: &str) {
        match self.parse_token(token) {
            Ok(claims) => tracing::info!(
                user_id = %claims.sub,
                jti = %claims.jti,
                expires_at = claims.exp,
                "Session token destroyed"
            ),
            Err(e) => tracing::debug!("Destroying unparsable token: {}", e),
        }
    }
}
