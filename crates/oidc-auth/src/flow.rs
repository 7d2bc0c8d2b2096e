//! Authorization-code + PKCE login flow
//!
//! `FlowController` ties the login store, the identity provider, ID token
//! validation and session issuance together. The lifecycle of a single
//! login is modelled by the pure `transition` function:
//!
//! ```text
//! Idle ──Started──► AwaitingCallback ──CallbackReceived──► Exchanging
//!                                                            │
//!                                    TokensValidated ◄───────┘
//!                                          │
//!                                          ▼
//!                                   Authenticated
//! ```
//!
//! Any `Failed` event, or an event that does not fit the current state,
//! ends in `Failed`. No session is issued from any state but `Exchanging`.

use std::sync::Arc;
use std::time::Instant;

use provider::{AuthorizationRequest, IdentityProvider};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AuthError, Result};
use crate::id_token::IdTokenValidator;
use crate::session::{Session, SessionManager};
use crate::store::LoginStore;

/// Phase of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Idle,
    AwaitingCallback,
    Exchanging,
    Authenticated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginEvent {
    Started,
    CallbackReceived,
    TokensValidated,
    Failed,
}

/// Pure state transition for a login attempt.
pub fn transition(state: LoginState, event: LoginEvent) -> LoginState {
    match (state, event) {
        (LoginState::Idle, LoginEvent::Started) => LoginState::AwaitingCallback,
        (LoginState::AwaitingCallback, LoginEvent::CallbackReceived) => LoginState::Exchanging,
        (LoginState::Exchanging, LoginEvent::TokensValidated) => LoginState::Authenticated,
        (_, _) => LoginState::Failed,
    }
}

fn advance(state: &mut LoginState, event: LoginEvent) {
    let next = transition(*state, event);
    debug!(from = ?*state, ?event, to = ?next, "login transition");
    *state = next;
}

/// Where to send the browser to start a login.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub url: String,
    pub state: String,
}

/// Query parameters of the redirect back from the issuer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// A completed login.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub session: Session,
    /// Encrypted session token for the cookie
    pub token: String,
    pub return_to: String,
}

pub struct FlowController {
    provider: Arc<dyn IdentityProvider>,
    logins: Arc<LoginStore>,
    sessions: Arc<SessionManager>,
    validator: IdTokenValidator,
    post_logout_redirect: Option<String>,
}

impl FlowController {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        logins: Arc<LoginStore>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            validator: IdTokenValidator::new(provider.clone()),
            provider,
            logins,
            sessions,
            post_logout_redirect: None,
        }
    }

    /// Where the issuer should send the browser after RP-initiated logout.
    pub fn with_post_logout_redirect(mut self, url: Option<String>) -> Self {
        self.post_logout_redirect = url;
        self
    }

    pub fn provider(&self) -> &dyn IdentityProvider {
        self.provider.as_ref()
    }

    pub fn logins(&self) -> &LoginStore {
        &self.logins
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Begin a login and build the authorization redirect.
    pub async fn start_login(&self, return_to: Option<&str>) -> Result<LoginRedirect> {
        let mut phase = LoginState::Idle;
        let pending = self.logins.begin(return_to).await?;

        let url = match self.provider.authorization_url(&AuthorizationRequest {
            state: &pending.state,
            code_challenge: &pending.challenge,
            nonce: &pending.nonce,
        }) {
            Ok(url) => url,
            Err(e) => {
                // Nobody can complete this attempt; drop it now
                let _ = self.logins.redeem(&pending.state).await;
                return Err(AuthError::Internal(format!(
                    "building authorization URL: {e}"
                )));
            }
        };

        advance(&mut phase, LoginEvent::Started);
        debug_assert_eq!(phase, LoginState::AwaitingCallback);
        metrics::counter!("oidc_logins_started_total").increment(1);

        Ok(LoginRedirect {
            url,
            state: pending.state,
        })
    }

    /// Complete a login from the issuer's callback.
    pub async fn handle_callback(&self, params: CallbackParams) -> Result<Authenticated> {
        let mut phase = LoginState::AwaitingCallback;
        let result = self.complete(&mut phase, params).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::counter!("oidc_callbacks_total", "outcome" => outcome).increment(1);

        match &result {
            Ok(done) => {
                debug_assert_eq!(phase, LoginState::Authenticated);
                info!(sub = %done.session.sub, "login completed");
            }
            Err(e) => {
                advance(&mut phase, LoginEvent::Failed);
                warn!(error = %e, kind = e.kind(), "login failed");
            }
        }
        result
    }

    async fn complete(
        &self,
        phase: &mut LoginState,
        params: CallbackParams,
    ) -> Result<Authenticated> {
        if let Some(error) = params.error {
            // Burn the attempt so the state cannot be replayed
            if let Some(state) = params.state.as_deref() {
                let _ = self.logins.redeem(state).await;
            }
            return Err(AuthError::ProviderRejected {
                error,
                description: params.error_description,
            });
        }

        let state = params
            .state
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::StateMismatch)?;
        let attempt = self.logins.redeem(&state).await?;

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::ProviderRejected {
                error: "invalid_request".into(),
                description: Some("callback is missing the authorization code".into()),
            })?;

        advance(phase, LoginEvent::CallbackReceived);

        let started = Instant::now();
        let exchanged = self.provider.exchange_code(&code, &attempt.verifier).await;
        metrics::histogram!("oidc_token_exchange_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        let tokens = exchanged.map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or_else(|| AuthError::TokenInvalid("token response has no id_token".into()))?;
        let validated = self.validator.validate(id_token, &attempt.nonce).await?;

        let mut claims = validated.claims;
        match self.provider.user_info(&tokens.access_token).await {
            Ok(Some(info)) => {
                if info.get("sub").and_then(Value::as_str) != Some(validated.subject.as_str()) {
                    return Err(AuthError::TokenInvalid(
                        "userinfo subject does not match ID token".into(),
                    ));
                }
                claims.extend(info);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "userinfo request failed, using ID token claims only"),
        }

        advance(phase, LoginEvent::TokensValidated);
        if *phase != LoginState::Authenticated {
            return Err(AuthError::Internal(format!(
                "login reached session issuance in state {phase:?}"
            )));
        }
        let (token, session) = self.sessions.issue(&validated.subject, claims)?;

        Ok(Authenticated {
            session,
            token,
            return_to: attempt.return_to,
        })
    }

    /// Revoke the session behind `token` (if any) and return the issuer's
    /// end-session URL when it publishes one.
    pub fn logout(&self, token: Option<&str>) -> Option<String> {
        if let Some(token) = token {
            self.sessions.revoke(token);
        }
        self.provider
            .end_session_url(self.post_logout_redirect.as_deref())
    }
}
