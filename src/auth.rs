//! Per request view of the OpenID Connect session.
//!
//! [`OidcContext`] is the extractor every page handler takes: it loads the
//! session record once and hands it to the handler explicitly. [`RequireAuth`]
//! is the guard for pages that must not render without a signed-in user.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_sessions::Session;

use crate::error::AppError;

const SESSION_KEY: &str = "oidc";
const AUTH_REQUEST_KEY: &str = "oidc.auth_request";

/// Claims of the verified ID token, or a userinfo document.
pub type UserProfile = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OidcSession {
    pub user: Option<UserProfile>,
    pub tokens: Option<TokenSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: AccessToken,
    pub id_token: String,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: String,
    /// Unix time in seconds.
    pub expires_at: Option<u64>,
}

impl OidcSession {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .map(|tokens| tokens.access_token.access_token.as_str())
            .filter(|token| !token.is_empty())
    }
}

/// Kept in the session between `/login` and `/callback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub state: String,
    pub nonce: String,
    pub return_to: ReturnTo,
}

/// Path to send the browser back to after login.
///
/// Only paths on this site are accepted, anything else becomes `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnTo(String);

impl ReturnTo {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(path) if is_local_path(path) => Self(path.to_string()),
            _ => Self::default(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ReturnTo {
    fn default() -> Self {
        Self("/".to_string())
    }
}

fn is_local_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    !rest.starts_with(['/', '\\']) && !path.chars().any(char::is_control)
}

/// `/login` URL that comes back to `return_to`.
pub fn login_path(return_to: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(return_to.as_bytes()).collect();
    format!("/login?returnTo={encoded}")
}

pub struct OidcContext {
    session: Session,
    record: OidcSession,
}

impl OidcContext {
    pub fn record(&self) -> &OidcSession {
        &self.record
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.record.user.as_ref()
    }

    pub fn tokens(&self) -> Option<&TokenSet> {
        self.record.tokens.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.record.is_authenticated()
    }

    pub async fn save_auth_request(&self, request: &AuthRequest) -> Result<(), AppError> {
        self.session.insert(AUTH_REQUEST_KEY, request).await?;
        Ok(())
    }

    pub async fn take_auth_request(&self) -> Result<Option<AuthRequest>, AppError> {
        Ok(self.session.remove::<AuthRequest>(AUTH_REQUEST_KEY).await?)
    }

    /// Stores the signed-in user under a fresh session id.
    pub async fn sign_in(&self, record: &OidcSession) -> Result<(), AppError> {
        self.session.cycle_id().await?;
        self.session.insert(SESSION_KEY, record).await?;
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<(), AppError> {
        self.session.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for OidcContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::SessionMissing)?;
        let record = session
            .get::<OidcSession>(SESSION_KEY)
            .await?
            .unwrap_or_default();

        Ok(Self { session, record })
    }
}

/// Rejects anonymous requests with a redirect to `/login`.
pub struct RequireAuth(pub OidcContext);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = OidcContext::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        if context.is_authenticated() {
            return Ok(RequireAuth(context));
        }

        let return_to = parts
            .uri
            .path_and_query()
            .map(|path| path.as_str())
            .unwrap_or("/");
        tracing::debug!("Authentication required for {}", return_to);
        Err(Redirect::to(&login_path(return_to)).into_response())
    }
}
