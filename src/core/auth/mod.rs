//! Authentication for the accounts service
//!
//! - password hashing (bcrypt)
//! - session tokens (JWT, HS256)
//! - token transport over a header or the `token` cookie
//! - request middleware and authorization guards

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod transport;

pub use jwt::{Claims, JwtConfig, JwtError, JwtService, TokenType};
pub use middleware::{
    AdminGuardMode, AuthSettings, AuthState, DecodeFailurePolicy, RequestContext, ensure_admin,
    ensure_logged_in, ensure_not_logged_in, set_user_status,
};
pub use password::{PasswordError, check_password, hash_password};
pub use transport::{TOKEN_COOKIE, TokenSource, TransportError};
