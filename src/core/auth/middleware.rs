//! Request authentication and authorization guards
//!
//! `set_user_status` runs on every request and stores a [`RequestContext`]
//! in the request extensions. The guards read that context and either let
//! the request through or answer with the JSON envelope.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::jwt::{Claims, JwtService, TokenType};
use super::transport::TokenSource;
use crate::core::api::ApiError;

/// Role value granting admin rights unless configured otherwise
pub const DEFAULT_ADMIN_ROLE: &str = "admin";

/// What to answer when a presented token does not decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeFailurePolicy {
    /// 500 carrying the decode error
    #[default]
    InternalError,
    /// 401
    Unauthorized,
}

/// How `ensure_admin` treats admins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminGuardMode {
    /// Admins are rejected, everyone else passes
    #[default]
    Inverted,
    /// Only admins pass
    Strict,
}

/// Authentication settings
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub token_source: TokenSource,
    pub decode_failure: DecodeFailurePolicy,
    pub admin_guard: AdminGuardMode,
    pub admin_role: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_source: TokenSource::default(),
            decode_failure: DecodeFailurePolicy::default(),
            admin_guard: AdminGuardMode::default(),
            admin_role: DEFAULT_ADMIN_ROLE.to_string(),
        }
    }
}

/// State shared by the middleware stack
#[derive(Clone)]
pub struct AuthState {
    jwt: JwtService,
    settings: Arc<AuthSettings>,
}

impl AuthState {
    pub fn new(jwt: JwtService, settings: AuthSettings) -> Self {
        Self {
            jwt,
            settings: Arc::new(settings),
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn token_source(&self) -> &TokenSource {
        &self.settings.token_source
    }
}

// ============================================================================
// Request Context
// ============================================================================

/// Who is making the request, as established by `set_user_status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub is_logged: bool,
    pub id: Option<i64>,
    pub role: Option<String>,
    pub is_admin: bool,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self {
            is_logged: false,
            id: None,
            role: None,
            is_admin: false,
        }
    }

    fn from_claims(claims: Claims, id: i64, admin_role: &str) -> Self {
        let is_admin = claims.role == admin_role;
        Self {
            is_logged: true,
            id: Some(id),
            role: Some(claims.role),
            is_admin,
        }
    }

    /// Id of the logged in user
    pub fn user_id(&self) -> Result<i64, ApiError> {
        match (self.is_logged, self.id) {
            (true, Some(id)) => Ok(id),
            _ => Err(ApiError::Unauthorized),
        }
    }
}

/// Never fails: requests that skipped `set_user_status` read as anonymous
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(RequestContext::anonymous))
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Decode the request token, if any, into a [`RequestContext`]
pub async fn set_user_status(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = state.token_source().read(request.headers()) else {
        request.extensions_mut().insert(RequestContext::anonymous());
        return next.run(request).await;
    };

    let context = state
        .jwt
        .decode_token(&token, TokenType::Access)
        .and_then(|claims| {
            let id = claims.user_id()?;
            Ok(RequestContext::from_claims(claims, id, &state.settings.admin_role))
        });

    match context {
        Ok(context) => {
            tracing::debug!(user_id = ?context.id, is_admin = context.is_admin, "Request authenticated");
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!("Token rejected: {}", e);
            match state.settings.decode_failure {
                DecodeFailurePolicy::InternalError => ApiError::Internal(e.to_string()),
                DecodeFailurePolicy::Unauthorized => ApiError::Unauthorized,
            }
            .into_response()
        }
    }
}

/// Reject anonymous requests with 401
pub async fn ensure_logged_in(context: RequestContext, request: Request, next: Next) -> Response {
    if !context.is_logged {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

/// Let the request through as anonymous, logging out a caller who still
/// carries a session
pub async fn ensure_not_logged_in(
    State(state): State<AuthState>,
    context: RequestContext,
    mut request: Request,
    next: Next,
) -> Response {
    if !context.is_logged {
        return next.run(request).await;
    }

    let source = state.token_source();
    if let Some(token) = source.read(request.headers()) {
        state.jwt.destroy(&token);
    }
    source.remove_from_request(request.headers_mut());
    request.extensions_mut().insert(RequestContext::anonymous());

    let mut response = next.run(request).await;

    // A token issued by the handler itself wins over the clearing headers
    for (name, value) in source.clear().iter() {
        if !response.headers().contains_key(name) {
            response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    response
}

/// Admin gate, see [`AdminGuardMode`]
pub async fn ensure_admin(
    State(state): State<AuthState>,
    context: RequestContext,
    request: Request,
    next: Next,
) -> Response {
    let allowed = match state.settings.admin_guard {
        AdminGuardMode::Inverted => !context.is_admin,
        AdminGuardMode::Strict => context.is_admin,
    };

    if !allowed {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}
