//! Blog Accounts - user accounts and sessions for the blog backend
//!
//! Users live in PostgreSQL with a Redis hash per user in front of it;
//! sessions are stateless JWTs carried in a header or the `token` cookie.

pub mod core;
