//! Errors that escape a handler and the boundary that renders them.
//!
//! Handlers return [`AppError`]; its response only carries a status code and
//! an [`ErrorPage`] extension. [`render_error_page`] wraps the whole router and
//! turns those responses into the `error` view, so every error page is
//! rendered the same way, 404s and 405s from the router included.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{auth::OidcContext, openid::OidcError, AppState};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not Found")]
    NotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("session layer is not installed")]
    SessionMissing,

    #[error("session store error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Login request is missing or does not match, please sign in again")]
    InvalidLoginState,

    #[error("Identity provider returned {error}: {description}")]
    Provider { error: String, description: String },

    #[error("Login failed: {0}")]
    Login(#[from] OidcError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::InvalidLoginState | AppError::Provider { .. } => StatusCode::BAD_REQUEST,
            AppError::Login(_) => StatusCode::BAD_GATEWAY,
            AppError::SessionMissing | AppError::Session(_) | AppError::Template(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Marker left on a response for [`render_error_page`].
#[derive(Debug, Clone)]
pub struct ErrorPage {
    pub status: StatusCode,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!("{}, {}", status, self);
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        } else {
            tracing::debug!("{}, {}", status, self);
            self.to_string()
        };

        let mut response = status.into_response();
        response
            .extensions_mut()
            .insert(ErrorPage { status, message });
        response
    }
}

#[derive(Serialize)]
struct ErrorView<'a> {
    path: &'a str,
    user: Option<&'a crate::auth::UserProfile>,
    status: u16,
    message: &'a str,
}

pub async fn render_error_page(
    State(state): State<AppState>,
    context: OidcContext,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    let response = next.run(request).await;

    let Some(page) = response.extensions().get::<ErrorPage>().cloned() else {
        return response;
    };

    let view = ErrorView {
        path: &path,
        user: context.user(),
        status: page.status.as_u16(),
        message: &page.message,
    };
    match state.views.render("error", &view) {
        Ok(html) => (page.status, html).into_response(),
        Err(e) => {
            tracing::error!("Error page not rendered: {}", e);
            (page.status, page.message).into_response()
        }
    }
}

/// Fallback for unmatched routes and missing static files.
pub async fn not_found() -> AppError {
    AppError::NotFound
}

pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(AppError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::MethodNotAllowed.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(AppError::InvalidLoginState.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::Login(OidcError::MissingIdToken).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::SessionMissing.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_carries_error_page() {
        let response = AppError::NotFound.into_response();
        let page = response.extensions().get::<ErrorPage>().unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(page.status, StatusCode::NOT_FOUND);
        assert_eq!(page.message, "Not Found");
    }

    #[test]
    fn server_errors_hide_details() {
        let response = AppError::SessionMissing.into_response();
        let page = response.extensions().get::<ErrorPage>().unwrap();

        assert_eq!(page.message, "Internal Server Error");
    }
}
