//! Accounts domain: users, sessions and the HTTP surface over them

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
