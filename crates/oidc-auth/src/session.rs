//! Encrypted, client-held session tokens
//!
//! A token is `v1.` followed by base64url(nonce ‖ AES-256-GCM ciphertext)
//! of the JSON-encoded [`Session`]. Nothing is stored server-side except
//! the ids of revoked sessions, kept until those sessions would have
//! expired anyway.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::constants::{
    MAX_SESSION_TOKEN_LEN, MAX_SESSION_TTL, REGISTERED_CLAIMS, SESSION_TOKEN_PREFIX,
};
use crate::error::SessionError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// An authenticated user's session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Random session id, the handle used for revocation
    pub sid: String,
    pub sub: String,
    /// Unix seconds
    pub iat: u64,
    /// Unix seconds
    pub exp: u64,
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl Session {
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.exp
    }
}

/// Issues and verifies session tokens.
pub struct SessionManager {
    cipher: Aes256Gcm,
    ttl: Duration,
    /// Revoked session ids mapped to their expiry
    revoked: Mutex<HashMap<String, u64>>,
}

impl SessionManager {
    /// The cipher key is SHA-256 of `key`, so any non-empty string works.
    /// `ttl` is capped at [`MAX_SESSION_TTL`].
    pub fn new(key: &Secret<String>, ttl: Duration) -> Self {
        let digest: [u8; 32] = Sha256::digest(key.expose().as_bytes()).into();
        Self {
            cipher: Aes256Gcm::new((&digest).into()),
            ttl: ttl.min(MAX_SESSION_TTL),
            revoked: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a session for `subject` with the given claims.
    pub fn issue(
        &self,
        subject: &str,
        claims: Map<String, Value>,
    ) -> Result<(String, Session), SessionError> {
        self.issue_at(subject, claims, now_secs())
    }

    pub fn issue_at(
        &self,
        subject: &str,
        mut claims: Map<String, Value>,
        now: u64,
    ) -> Result<(String, Session), SessionError> {
        claims.retain(|name, _| !REGISTERED_CLAIMS.contains(&name.as_str()));

        let session = Session {
            sid: uuid::Uuid::new_v4().to_string(),
            sub: subject.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl.as_secs()),
            claims,
        };

        let token = self.seal(&session)?;
        if token.len() > MAX_SESSION_TOKEN_LEN {
            return Err(SessionError::TooLarge(token.len()));
        }
        Ok((token, session))
    }

    /// Decrypt and check a token against the current time.
    pub fn verify(&self, token: &str) -> Result<Session, SessionError> {
        self.verify_at(token, now_secs())
    }

    pub fn verify_at(&self, token: &str, now: u64) -> Result<Session, SessionError> {
        let session = self.open(token)?;
        if session.is_expired_at(now) {
            return Err(SessionError::Expired);
        }
        if self.is_revoked(&session.sid) {
            debug!(sid = %session.sid, "rejecting revoked session");
            return Err(SessionError::Invalid);
        }
        Ok(session)
    }

    /// Revoke the session behind `token`. Unreadable or already expired
    /// tokens are ignored; they can never verify again anyway.
    pub fn revoke(&self, token: &str) {
        let now = now_secs();
        let Ok(session) = self.open(token) else {
            return;
        };

        let mut revoked = self.revoked.lock().unwrap_or_else(PoisonError::into_inner);
        revoked.retain(|_, exp| *exp > now);
        if !session.is_expired_at(now) {
            revoked.insert(session.sid, session.exp);
        }
    }

    /// Number of revocations still being tracked.
    pub fn revoked_count(&self) -> usize {
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn is_revoked(&self, sid: &str) -> bool {
        self.revoked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(sid)
    }

    fn seal(&self, session: &Session) -> Result<String, SessionError> {
        let payload =
            serde_json::to_vec(session).map_err(|e| SessionError::Encode(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload.as_ref())
            .map_err(|_| SessionError::Encode("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(format!("{SESSION_TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(out)))
    }

    fn open(&self, token: &str) -> Result<Session, SessionError> {
        if token.len() > MAX_SESSION_TOKEN_LEN {
            return Err(SessionError::Invalid);
        }
        let encoded = token
            .strip_prefix(SESSION_TOKEN_PREFIX)
            .ok_or(SessionError::Invalid)?;
        let raw = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| SessionError::Invalid)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(SessionError::Invalid);
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SessionError::Invalid)?;

        serde_json::from_slice(&plaintext).map_err(|_| SessionError::Invalid)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
