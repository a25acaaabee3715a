//! Where the session token travels: a request header or the `token` cookie

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use axum_extra::extract::cookie::{Cookie, CookieJar};

/// Cookie carrying the session token
pub const TOKEN_COOKIE: &str = "token";

/// Default header carrying the session token
pub const DEFAULT_TOKEN_HEADER: &str = "Authorization";

/// Token transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed setting token")]
    InvalidUserId,

    #[error("token is not a valid header value")]
    InvalidHeaderValue(#[from] header::InvalidHeaderValue),
}

/// Token transport selected at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Raw token (or `Bearer <token>`) in a request header
    Header { name: HeaderName },
    /// `token` cookie
    Cookie { domain: String, secure: bool },
}

impl Default for TokenSource {
    fn default() -> Self {
        TokenSource::Header {
            name: header::AUTHORIZATION,
        }
    }
}

impl TokenSource {
    /// Token carried by the request, if any
    pub fn read(&self, headers: &HeaderMap) -> Option<String> {
        let token = match self {
            TokenSource::Header { name } => {
                let value = headers.get(name)?.to_str().ok()?.trim();
                match value.strip_prefix("Bearer") {
                    Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim().to_string(),
                    _ => value.to_string(),
                }
            }
            TokenSource::Cookie { .. } => CookieJar::from_headers(headers)
                .get(TOKEN_COOKIE)?
                .value()
                .to_string(),
        };

        (!token.is_empty()).then_some(token)
    }

    /// Strip the token from an incoming request
    pub fn remove_from_request(&self, headers: &mut HeaderMap) {
        match self {
            TokenSource::Header { name } => {
                headers.remove(name);
            }
            TokenSource::Cookie { .. } => {
                let remaining: Vec<String> = CookieJar::from_headers(headers)
                    .iter()
                    .filter(|cookie| cookie.name() != TOKEN_COOKIE)
                    .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
                    .collect();

                headers.remove(header::COOKIE);
                if !remaining.is_empty()
                    && let Ok(value) = HeaderValue::from_str(&remaining.join("; "))
                {
                    headers.insert(header::COOKIE, value);
                }
            }
        }
    }

    /// Response headers handing a freshly issued token to the client
    pub fn issue(
        &self,
        user_id: i64,
        token: &str,
        max_age_secs: i64,
    ) -> Result<HeaderMap, TransportError> {
        if user_id <= 0 {
            return Err(TransportError::InvalidUserId);
        }

        let mut headers = HeaderMap::new();
        match self {
            TokenSource::Header { name } => {
                headers.insert(name.clone(), HeaderValue::from_str(token)?);
            }
            TokenSource::Cookie { domain, secure } => {
                let cookie = Cookie::build((TOKEN_COOKIE, token.to_string()))
                    .path("/")
                    .domain(domain.clone())
                    .http_only(true)
                    .secure(*secure)
                    .max_age(time::Duration::seconds(max_age_secs))
                    .build();
                headers.insert(header::SET_COOKIE, HeaderValue::from_str(&cookie.to_string())?);
            }
        }
        Ok(headers)
    }

    /// Response headers telling the client to drop its token
    pub fn clear(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match self {
            TokenSource::Header { name } => {
                headers.insert(name.clone(), HeaderValue::from_static(""));
            }
            TokenSource::Cookie { domain, secure } => {
                let mut cookie = Cookie::build((TOKEN_COOKIE, ""))
                    .path("/")
                    .domain(domain.clone())
                    .http_only(true)
                    .secure(*secure)
                    .build();
                cookie.make_removal();
                if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                    headers.insert(header::SET_COOKIE, value);
                }
            }
        }
        headers
    }
}
