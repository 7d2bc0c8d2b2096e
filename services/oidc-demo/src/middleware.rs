//! Access policies for routes
//!
//! - `require_authentication`: no valid session redirects to `/login`,
//!   carrying the original path and query in `return_to`
//! - `check_authentication`: never blocks; attaches the session when present
//!
//! Both put the verified `Session` into request extensions, where the
//! `AuthSession` extractor picks it up.

use std::convert::Infallible;

use axum::extract::{FromRequestParts, OptionalFromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use oidc_auth::Session;
use tracing::debug;

use crate::AppState;
use crate::metrics::{SessionCheck, record_session_check};
use crate::routes::found;

/// Session attached by one of the access middlewares.
#[derive(Debug, Clone)]
pub struct AuthSession(pub Session);

impl<S: Send + Sync> FromRequestParts<S> for AuthSession {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(AuthSession)
            .ok_or_else(|| found("/login"))
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for AuthSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<Session>().cloned().map(AuthSession))
    }
}

/// Verify the session cookie, if any.
fn current_session(state: &AppState, jar: &CookieJar) -> Option<Session> {
    let Some(cookie) = jar.get(&state.cookie.name) else {
        record_session_check(SessionCheck::Missing);
        return None;
    };

    match state.flow.sessions().verify(cookie.value()) {
        Ok(session) => {
            record_session_check(SessionCheck::Valid);
            Some(session)
        }
        // Expired and forged cookies are treated alike: as no session
        Err(e) => {
            debug!(error = ?e, "ignoring unusable session cookie");
            record_session_check(SessionCheck::Invalid);
            None
        }
    }
}

pub async fn require_authentication(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match current_session(&state, &jar) {
        Some(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        None => {
            let return_to = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let encoded: String = url::form_urlencoded::byte_serialize(return_to.as_bytes()).collect();
            found(&format!("/login?return_to={encoded}"))
        }
    }
}

pub async fn check_authentication(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(session) = current_session(&state, &jar) {
        request.extensions_mut().insert(session);
    }
    next.run(request).await
}
