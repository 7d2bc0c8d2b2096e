//! HTTP error responses
//!
//! Maps login failures to status codes and a rendered error page. What a
//! client sees is deliberately coarse; the precise cause is only logged.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use oidc_auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::templates;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl AppError {
    /// Status code, client-facing message and whether to offer a new login.
    fn parts(&self) -> (StatusCode, String, bool) {
        let AppError::Auth(err) = self;
        match err {
            AuthError::StateMismatch | AuthError::LoginExpired => {
                (StatusCode::BAD_REQUEST, "login expired, retry".into(), true)
            }
            AuthError::ProviderRejected { error, description } => (
                StatusCode::UNAUTHORIZED,
                description.clone().unwrap_or_else(|| error.clone()),
                true,
            ),
            AuthError::TokenExchange(_) => (
                StatusCode::BAD_GATEWAY,
                "the identity provider could not be reached".into(),
                true,
            ),
            AuthError::TokenInvalid(_) => {
                (StatusCode::UNAUTHORIZED, "authentication failed".into(), true)
            }
            AuthError::StoreFull => (
                StatusCode::SERVICE_UNAVAILABLE,
                "too many logins in progress, try again shortly".into(),
                true,
            ),
            AuthError::Session(_) | AuthError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".into(),
                false,
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, offer_retry) = self.parts();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }
        let page = templates::error_page(status, &message, offer_retry);
        (status, Html(page.into_string())).into_response()
    }
}
