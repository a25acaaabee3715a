//! HTTP surface
//!
//! Every route runs behind `set_user_status`; the per-route guards decide
//! who may reach the handler.

pub mod response;
pub mod users;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::core::auth::{
    AuthState, ensure_admin, ensure_logged_in, ensure_not_logged_in, set_user_status,
};
use crate::core::cache::UserCache;
use crate::core::db::{UserRepository, UserStore};

pub use response::{ApiError, ApiResponse};

/// Shared handler state, built once at startup
pub struct AppState<S, C> {
    pub repository: UserRepository<S, C>,
    pub auth: AuthState,
}

impl<S, C> AppState<S, C> {
    pub fn new(repository: UserRepository<S, C>, auth: AuthState) -> Self {
        Self { repository, auth }
    }
}

impl<S: Clone, C: Clone> Clone for AppState<S, C> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            auth: self.auth.clone(),
        }
    }
}

/// Build the application router
pub fn router<S: UserStore, C: UserCache>(state: AppState<S, C>) -> Router {
    let auth = state.auth.clone();

    let guest_routes = Router::new()
        .route("/api/users/register", post(users::register::<S, C>))
        .route("/api/users/login", post(users::login::<S, C>))
        .route_layer(middleware::from_fn_with_state(
            auth.clone(),
            ensure_not_logged_in,
        ));

    let admin_routes = Router::new()
        .route("/api/users", get(users::list_users::<S, C>))
        .route_layer(middleware::from_fn_with_state(auth.clone(), ensure_admin))
        .route_layer(middleware::from_fn(ensure_logged_in));

    let account_routes = Router::new()
        .route("/api/users/logout", post(users::logout::<S, C>))
        .route(
            "/api/users/me",
            get(users::get_me::<S, C>)
                .put(users::update_me::<S, C>)
                .delete(users::delete_me::<S, C>),
        )
        .route_layer(middleware::from_fn(ensure_logged_in));

    let public_routes = Router::new()
        .route("/health", get(users::health::<S, C>))
        .route("/api/users/{id}", get(users::get_user::<S, C>))
        .route("/api/users/{id}/username", get(users::get_username::<S, C>));

    Router::new()
        .merge(guest_routes)
        .merge(admin_routes)
        .merge(account_routes)
        .merge(public_routes)
        .layer(middleware::from_fn_with_state(auth, set_user_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
