//! Identity provider abstraction for the relying party
//!
//! Defines the `IdentityProvider` trait that decouples the login flow from
//! the HTTP details of talking to an OpenID Connect issuer.
//! `HttpIdentityProvider` is the production adapter (discovery document,
//! token endpoint, JWKS, userinfo); tests substitute an in-process fake.

pub mod discovery;
pub mod http;

pub use discovery::ProviderMetadata;
pub use http::{HttpIdentityProvider, ProviderSettings};

use jsonwebtoken::jwk::JwkSet;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;

/// Parameters embedded in the authorization redirect for one login attempt.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationRequest<'a> {
    /// Anti-forgery state, echoed back on the callback
    pub state: &'a str,
    /// S256 PKCE challenge derived from the attempt's verifier
    pub code_challenge: &'a str,
    /// Replay-protection nonce, expected back inside the ID token
    pub nonce: &'a str,
}

/// Successful response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Errors from provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("request to identity provider failed: {0}")]
    Transport(String),

    #[error("identity provider returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid response from identity provider: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Transport failures and 5xx responses may succeed on a second attempt;
    /// 4xx responses and malformed payloads never do.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::Discovery(_) | Self::InvalidResponse(_) => false,
        }
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Boxed future returned by the async trait methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Capability the login flow needs from an OpenID Connect issuer.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn IdentityProvider>`).
pub trait IdentityProvider: Send + Sync {
    /// Issuer identifier, compared against the `iss` claim of ID tokens.
    fn issuer(&self) -> &str;

    /// Client identifier registered at the issuer, the expected `aud`.
    fn client_id(&self) -> &str;

    /// Build the authorization endpoint URL the browser is redirected to.
    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> Result<String>;

    /// Exchange an authorization code and its PKCE verifier for tokens.
    fn exchange_code<'a>(&'a self, code: &'a str, verifier: &'a str)
    -> ProviderFuture<'a, TokenSet>;

    /// Signing keys used to verify ID tokens.
    ///
    /// Implementations may cache; `force_refresh` bypasses the cache, which
    /// the validator does once when a token names an unknown key ID.
    fn discover_keys(&self, force_refresh: bool) -> ProviderFuture<'_, JwkSet>;

    /// Claims from the userinfo endpoint, or `None` when the issuer does not
    /// publish one.
    fn user_info<'a>(
        &'a self,
        access_token: &'a str,
    ) -> ProviderFuture<'a, Option<serde_json::Map<String, serde_json::Value>>>;

    /// RP-initiated logout URL, when the issuer supports it.
    fn end_session_url(&self, post_logout_redirect: Option<&str>) -> Option<String>;
}
