//! In-process identity provider for tests
//!
//! `FakeProvider` behaves like a tiny issuer: it hands out authorization
//! codes bound to a PKCE challenge, exchanges them for RS256-signed ID
//! tokens and serves the matching key set.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use provider::{
    AuthorizationRequest, IdentityProvider, ProviderError, ProviderFuture, Result, TokenSet,
};
use serde_json::{Map, Value, json};

use crate::pkce::{compute_challenge, random_token};

pub const TEST_ISSUER: &str = "https://id.example.test";
pub const TEST_CLIENT_ID: &str = "demo-client";
pub const TEST_KEY_ID: &str = "test-key";

const TEST_RSA_PEM: &str = include_str!("../fixtures/test_rsa.pem");

const TEST_RSA_N: &str = "1sVA1bxho10Dx3ifQ-XIfx9FtvjAXlTF9yRVjAGArYVowexuQ09fVk1eSEnMbg-_51Cpez56UJszbNyrqYtmlDFIg7NKUSqe7bBBGJ6eyqI4F3grOmw35NDOMdWyj59sHGkuQOvCagWtzR3e7OCl5xCSIVAlWnN5gmyiOH43F8St4bu1wHpawxAS1a1J9SR9xX0pUEAO3PPzU-wT-TnF3nlF_dWTL79xpGX7nqYlL8Okg3AzRrM4t9SCftuN3CePb60XSms3cJvAORxcpYl7gYNZmap6vDmQwTQ4VXJc7uPzvQojxTNDgesvhr-KSuNl3m9NufjQiAFQ5VTgBd7VVw";

/// Key set containing the public half of the fixture key.
pub fn test_key_set() -> JwkSet {
    serde_json::from_value(json!({
        "keys": [{
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": TEST_KEY_ID,
            "n": TEST_RSA_N,
            "e": "AQAB"
        }]
    }))
    .expect("fixture key set parses")
}

/// Sign `claims` with the fixture key under `TEST_KEY_ID`.
pub fn sign_id_token(claims: &Value) -> String {
    sign_id_token_with_kid(claims, TEST_KEY_ID)
}

pub fn sign_id_token_with_kid(claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(TEST_RSA_PEM.as_bytes()).expect("fixture key parses");
    encode(&header, claims, &key).expect("signing succeeds")
}

struct IssuedCode {
    challenge: String,
    id_token: String,
}

pub struct FakeProvider {
    issuer: String,
    client_id: String,
    keys: Mutex<JwkSet>,
    /// Served instead of `keys` on the next forced refresh
    rotated_keys: Mutex<Option<JwkSet>>,
    codes: Mutex<HashMap<String, IssuedCode>>,
    userinfo: Mutex<Option<Map<String, Value>>>,
    exchange_failure: Mutex<Option<ProviderError>>,
    authorization_failure: AtomicBool,
    end_session_endpoint: Option<String>,
    key_fetches: AtomicUsize,
    exchanges: AtomicUsize,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            issuer: TEST_ISSUER.to_string(),
            client_id: TEST_CLIENT_ID.to_string(),
            keys: Mutex::new(test_key_set()),
            rotated_keys: Mutex::new(None),
            codes: Mutex::new(HashMap::new()),
            userinfo: Mutex::new(None),
            exchange_failure: Mutex::new(None),
            authorization_failure: AtomicBool::new(false),
            end_session_endpoint: None,
            key_fetches: AtomicUsize::new(0),
            exchanges: AtomicUsize::new(0),
        }
    }

    pub fn with_end_session(mut self, endpoint: &str) -> Self {
        self.end_session_endpoint = Some(endpoint.to_string());
        self
    }

    /// Standard claims the issuer would put in an ID token for `subject`.
    pub fn id_token_claims(&self, subject: &str, nonce: &str) -> Value {
        let now = jsonwebtoken::get_current_timestamp();
        json!({
            "iss": self.issuer,
            "aud": self.client_id,
            "sub": subject,
            "nonce": nonce,
            "iat": now,
            "exp": now + 300,
            "email": format!("{subject}@example.test"),
            "name": format!("Test User {subject}")
        })
    }

    /// Play the user's side at the authorization endpoint: read the
    /// challenge and nonce out of `authorization_url` and return a code.
    pub fn authorize(&self, authorization_url: &str, subject: &str) -> String {
        let params = query_params(authorization_url);
        let claims = self.id_token_claims(subject, &params["nonce"]);
        self.issue_code(&params["code_challenge"], sign_id_token(&claims))
    }

    /// Register a code that exchanges to `id_token` when presented with a
    /// verifier matching `challenge`.
    pub fn issue_code(&self, challenge: &str, id_token: String) -> String {
        let code = random_token();
        self.codes.lock().expect("codes lock").insert(
            code.clone(),
            IssuedCode {
                challenge: challenge.to_string(),
                id_token,
            },
        );
        code
    }

    pub fn set_userinfo(&self, claims: Option<Value>) {
        *self.userinfo.lock().expect("userinfo lock") =
            claims.and_then(|c| c.as_object().cloned());
    }

    /// Make the next exchange fail with `err`.
    pub fn fail_next_exchange(&self, err: ProviderError) {
        *self.exchange_failure.lock().expect("failure lock") = Some(err);
    }

    /// Make the next `authorization_url` call fail.
    pub fn fail_next_authorization_url(&self) {
        self.authorization_failure.store(true, Ordering::SeqCst);
    }

    /// Serve an empty key set until the next forced refresh.
    pub fn rotate_keys_on_refresh(&self) {
        let current = std::mem::replace(
            &mut *self.keys.lock().expect("keys lock"),
            JwkSet { keys: Vec::new() },
        );
        *self.rotated_keys.lock().expect("keys lock") = Some(current);
    }

    pub fn key_fetches(&self) -> usize {
        self.key_fetches.load(Ordering::SeqCst)
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

fn query_params(url: &str) -> HashMap<String, String> {
    url::Url::parse(url)
        .expect("absolute authorization URL")
        .query_pairs()
        .into_owned()
        .collect()
}

impl IdentityProvider for FakeProvider {
    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn authorization_url(&self, request: &AuthorizationRequest<'_>) -> Result<String> {
        if self.authorization_failure.swap(false, Ordering::SeqCst) {
            return Err(ProviderError::Discovery(
                "authorization endpoint unavailable".into(),
            ));
        }
        let mut url = url::Url::parse(&format!("{}/oauth/v2/authorize", self.issuer))
            .map_err(|e| ProviderError::Discovery(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("state", request.state)
            .append_pair("nonce", request.nonce)
            .append_pair("code_challenge", request.code_challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url.into())
    }

    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        verifier: &'a str,
    ) -> ProviderFuture<'a, TokenSet> {
        Box::pin(async move {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.exchange_failure.lock().expect("failure lock").take() {
                return Err(err);
            }

            let issued = self.codes.lock().expect("codes lock").remove(code);
            let invalid_grant = || ProviderError::Rejected {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            };
            let issued = issued.ok_or_else(invalid_grant)?;
            if compute_challenge(verifier) != issued.challenge {
                return Err(invalid_grant());
            }

            Ok(TokenSet {
                access_token: format!("at-{}", random_token()),
                token_type: Some("Bearer".into()),
                id_token: Some(issued.id_token),
                refresh_token: None,
                expires_in: Some(3600),
            })
        })
    }

    fn discover_keys(&self, force_refresh: bool) -> ProviderFuture<'_, JwkSet> {
        Box::pin(async move {
            self.key_fetches.fetch_add(1, Ordering::SeqCst);
            if force_refresh {
                let rotated = self.rotated_keys.lock().expect("keys lock").take();
                if let Some(rotated) = rotated {
                    *self.keys.lock().expect("keys lock") = rotated;
                }
            }
            Ok(self.keys.lock().expect("keys lock").clone())
        })
    }

    fn user_info<'a>(
        &'a self,
        _access_token: &'a str,
    ) -> ProviderFuture<'a, Option<Map<String, Value>>> {
        Box::pin(async move { Ok(self.userinfo.lock().expect("userinfo lock").clone()) })
    }

    fn end_session_url(&self, post_logout_redirect: Option<&str>) -> Option<String> {
        let mut url = url::Url::parse(self.end_session_endpoint.as_deref()?).ok()?;
        url.query_pairs_mut().append_pair("client_id", &self.client_id);
        if let Some(redirect) = post_logout_redirect {
            url.query_pairs_mut()
                .append_pair("post_logout_redirect_uri", redirect);
        }
        Some(url.into())
    }
}
