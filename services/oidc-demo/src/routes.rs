//! Login, callback, logout and page handlers

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use oidc_auth::CallbackParams;
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::AuthSession;
use crate::templates;

/// Session cookie name and lifetime.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub ttl: Duration,
}

/// `302 Found` to `location`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

pub fn session_cookie(settings: &CookieSettings, token: String) -> Cookie<'static> {
    let max_age = i64::try_from(settings.ttl.as_secs()).unwrap_or(i64::MAX);
    Cookie::build((settings.name.clone(), token))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(max_age))
        .build()
}

pub async fn home(session: Option<AuthSession>) -> Response {
    match session {
        Some(_) => found("/profile"),
        None => Html(templates::home_page().into_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    return_to: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AppError> {
    let redirect = state.flow.start_login(query.return_to.as_deref()).await?;
    Ok(found(&redirect.url))
}

pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Response), AppError> {
    let done = state.flow.handle_callback(params).await?;
    let jar = jar.add(session_cookie(&state.cookie, done.token));
    Ok((jar, found(&done.return_to)))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Response) {
    let token = jar.get(&state.cookie.name).map(|c| c.value().to_string());
    let location = state.flow.logout(token.as_deref());
    if token.is_some() {
        info!("session logged out");
    }

    let jar = jar.remove(Cookie::build(state.cookie.name.clone()).path("/"));
    (jar, found(location.as_deref().unwrap_or("/")))
}

pub async fn profile(AuthSession(session): AuthSession) -> Html<String> {
    Html(templates::profile_page(&session).into_string())
}
