//! ID token validation
//!
//! Verifies the signature against the issuer's published keys and checks
//! `iss`, `aud`, `exp`, `nonce`, `sub` and (for multi-audience tokens)
//! `azp`. Only asymmetric algorithms are accepted: a relying party never
//! shares a MAC key with the issuer for ID tokens.

use std::sync::Arc;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use provider::IdentityProvider;
use serde_json::{Map, Value};
use tracing::debug;

use crate::constants::ID_TOKEN_LEEWAY_SECS;
use crate::error::{AuthError, Result};

const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Claims of an ID token that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedIdToken {
    pub subject: String,
    pub claims: Map<String, Value>,
}

pub struct IdTokenValidator {
    provider: Arc<dyn IdentityProvider>,
}

impl IdTokenValidator {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Validate `id_token` for the login whose nonce was `expected_nonce`.
    pub async fn validate(&self, id_token: &str, expected_nonce: &str) -> Result<ValidatedIdToken> {
        let header = decode_header(id_token)
            .map_err(|e| AuthError::TokenInvalid(format!("malformed header: {e}")))?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::TokenInvalid(format!(
                "algorithm {:?} not allowed",
                header.alg
            )));
        }

        let key = self.decoding_key(header.kid.as_deref()).await?;

        let client_id = self.provider.client_id();
        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.provider.issuer()]);
        validation.set_audience(&[client_id]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = ID_TOKEN_LEEWAY_SECS;

        let claims = decode::<Map<String, Value>>(id_token, &key, &validation)
            .map_err(|e| AuthError::TokenInvalid(e.to_string()))?
            .claims;

        match claims.get("nonce").and_then(Value::as_str) {
            Some(nonce) if nonce == expected_nonce => {}
            Some(_) => return Err(AuthError::TokenInvalid("nonce mismatch".into())),
            None => return Err(AuthError::TokenInvalid("nonce missing".into())),
        }

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::TokenInvalid("empty subject".into()))?
            .to_string();

        let multiple_audiences = claims
            .get("aud")
            .and_then(Value::as_array)
            .is_some_and(|aud| aud.len() > 1);
        match claims.get("azp").and_then(Value::as_str) {
            Some(azp) if azp != client_id => {
                return Err(AuthError::TokenInvalid("azp does not name this client".into()));
            }
            None if multiple_audiences => {
                return Err(AuthError::TokenInvalid(
                    "azp required for multi-audience token".into(),
                ));
            }
            _ => {}
        }

        debug!(sub = %subject, alg = ?header.alg, "ID token validated");
        Ok(ValidatedIdToken { subject, claims })
    }

    /// Find the verification key, refetching the key set once when `kid`
    /// is unknown (the issuer may have rotated keys).
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey> {
        let keys = self.fetch_keys(false).await?;
        if let Some(key) = select_key(&keys, kid)? {
            return Ok(key);
        }

        debug!(kid, "signing key not cached, refreshing key set");
        let keys = self.fetch_keys(true).await?;
        select_key(&keys, kid)?
            .ok_or_else(|| AuthError::TokenInvalid("unknown signing key".into()))
    }

    async fn fetch_keys(&self, force_refresh: bool) -> Result<JwkSet> {
        self.provider
            .discover_keys(force_refresh)
            .await
            .map_err(|e| AuthError::TokenExchange(format!("fetching signing keys: {e}")))
    }
}

/// A token without `kid` is only accepted when the set holds a single key.
fn select_key(keys: &JwkSet, kid: Option<&str>) -> Result<Option<DecodingKey>> {
    let jwk = match kid {
        Some(kid) => keys.find(kid),
        None if keys.keys.len() == 1 => keys.keys.first(),
        None => None,
    };

    jwk.map(|jwk| {
        DecodingKey::from_jwk(jwk)
            .map_err(|e| AuthError::TokenInvalid(format!("unusable signing key: {e}")))
    })
    .transpose()
}
