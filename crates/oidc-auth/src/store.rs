//! Pending login attempts keyed by their anti-forgery state
//!
//! Each attempt carries the PKCE verifier and nonce generated at `/login`
//! and is consumed exactly once by the callback. Expired attempts are purged
//! lazily on `begin` and periodically by `spawn_sweeper`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::constants::{MAX_LOGIN_TTL, MAX_RETURN_TO_LEN};
use crate::error::StoreError;
use crate::pkce::{compute_challenge, generate_verifier, random_token};

/// Values for the authorization redirect of a freshly started login.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub state: String,
    pub verifier: String,
    pub challenge: String,
    pub nonce: String,
}

/// A login attempt as held by the store.
#[derive(Clone)]
pub struct LoginAttempt {
    pub state: String,
    pub verifier: String,
    pub nonce: String,
    /// Sanitized local path to land on after login
    pub return_to: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl fmt::Debug for LoginAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginAttempt")
            .field("return_to", &self.return_to)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// In-memory store of pending logins.
pub struct LoginStore {
    attempts: Mutex<HashMap<String, LoginAttempt>>,
    ttl: Duration,
    max_pending: usize,
}

impl LoginStore {
    /// `ttl` is capped at [`MAX_LOGIN_TTL`].
    pub fn new(ttl: Duration, max_pending: usize) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            ttl: ttl.min(MAX_LOGIN_TTL),
            max_pending,
        }
    }

    /// Create and store a new attempt.
    ///
    /// `return_to` is sanitized with [`sanitize_return_to`] before storing.
    pub async fn begin(&self, return_to: Option<&str>) -> Result<PendingLogin, StoreError> {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().await;
        attempts.retain(|_, a| a.expires_at > now);

        if attempts.len() >= self.max_pending {
            warn!(pending = attempts.len(), "pending login limit reached");
            return Err(StoreError::Full);
        }

        let verifier = generate_verifier();
        let pending = PendingLogin {
            state: random_token(),
            challenge: compute_challenge(&verifier),
            nonce: random_token(),
            verifier,
        };

        attempts.insert(
            pending.state.clone(),
            LoginAttempt {
                state: pending.state.clone(),
                verifier: pending.verifier.clone(),
                nonce: pending.nonce.clone(),
                return_to: sanitize_return_to(return_to),
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
        debug!(pending = attempts.len(), "login attempt stored");

        Ok(pending)
    }

    /// Remove and return the attempt for `state`.
    ///
    /// The attempt is removed even when it turns out to be expired, so a
    /// state can never be redeemed twice.
    pub async fn redeem(&self, state: &str) -> Result<LoginAttempt, StoreError> {
        let attempt = self
            .attempts
            .lock()
            .await
            .remove(state)
            .ok_or(StoreError::NotFound)?;

        if attempt.expires_at <= Instant::now() {
            return Err(StoreError::Expired);
        }
        Ok(attempt)
    }

    /// Drop expired attempts, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().await;
        let before = attempts.len();
        attempts.retain(|_, a| a.expires_at > now);
        before - attempts.len()
    }

    /// Number of stored attempts, including any not yet purged.
    pub async fn len(&self) -> usize {
        self.attempts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.attempts.lock().await.is_empty()
    }
}

/// Spawn a background task that purges expired attempts every `interval`.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_sweeper(store: Arc<LoginStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately; nothing can have expired yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                debug!(purged, "purged expired login attempts");
            }
        }
    })
}

/// Keep `raw` only if it is a local absolute path; otherwise `/`.
///
/// Rejects scheme-relative (`//host`) and backslash tricks that browsers
/// resolve to another origin, control characters, and oversized values.
pub fn sanitize_return_to(raw: Option<&str>) -> String {
    let Some(path) = raw else {
        return "/".to_string();
    };

    let acceptable = path.starts_with('/')
        && !path.starts_with("//")
        && !path.contains('\\')
        && !path.chars().any(char::is_control)
        && path.len() <= MAX_RETURN_TO_LEN;

    if acceptable {
        path.to_string()
    } else {
        debug!("discarding unsafe return_to");
        "/".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkce::is_valid_verifier;

    const TTL: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn begin_produces_matching_pkce_pair() {
        let store = LoginStore::new(TTL, 10);
        let pending = store.begin(Some("/profile")).await.unwrap();

        assert!(is_valid_verifier(&pending.verifier));
        assert_eq!(pending.challenge, compute_challenge(&pending.verifier));
        assert_ne!(pending.state, pending.nonce);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn redeem_succeeds_exactly_once() {
        let store = LoginStore::new(TTL, 10);
        let pending = store.begin(Some("/profile?tab=claims")).await.unwrap();

        let attempt = store.redeem(&pending.state).await.unwrap();
        assert_eq!(attempt.verifier, pending.verifier);
        assert_eq!(attempt.nonce, pending.nonce);
        assert_eq!(attempt.return_to, "/profile?tab=claims");

        assert_eq!(
            store.redeem(&pending.state).await.unwrap_err(),
            StoreError::NotFound
        );
        assert!(store.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_redeems_of_one_state_succeed_once() {
        let store = Arc::new(LoginStore::new(TTL, 10));
        let pending = store.begin(None).await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let state = pending.state.clone();
                tokio::spawn(async move { store.redeem(&state).await })
            })
            .collect();

        let mut redeemed = 0;
        let mut not_found = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(attempt) => {
                    assert_eq!(attempt.verifier, pending.verifier);
                    redeemed += 1;
                }
                Err(StoreError::NotFound) => not_found += 1,
                Err(other) => panic!("unexpected redeem error: {other:?}"),
            }
        }
        assert_eq!(redeemed, 1);
        assert_eq!(not_found, 15);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn oversized_ttl_is_capped() {
        let store = LoginStore::new(Duration::MAX, 10);
        let pending = store.begin(None).await.unwrap();
        assert!(store.redeem(&pending.state).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_state_is_not_found() {
        let store = LoginStore::new(TTL, 10);
        store.begin(None).await.unwrap();
        assert_eq!(
            store.redeem("forged-state").await.unwrap_err(),
            StoreError::NotFound
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_older_than_ttl_is_expired_and_removed() {
        let store = LoginStore::new(TTL, 10);
        let pending = store.begin(None).await.unwrap();

        tokio::time::advance(TTL + Duration::from_secs(1)).await;

        assert_eq!(
            store.redeem(&pending.state).await.unwrap_err(),
            StoreError::Expired
        );
        assert_eq!(
            store.redeem(&pending.state).await.unwrap_err(),
            StoreError::NotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_within_ttl_redeems() {
        let store = LoginStore::new(TTL, 10);
        let pending = store.begin(None).await.unwrap();
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert!(store.redeem(&pending.state).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn begin_purges_expired_before_enforcing_limit() {
        let store = LoginStore::new(TTL, 2);
        store.begin(None).await.unwrap();
        store.begin(None).await.unwrap();
        assert_eq!(store.begin(None).await.unwrap_err(), StoreError::Full);

        tokio::time::advance(TTL).await;
        assert!(store.begin(None).await.is_ok());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_attempts() {
        let store = Arc::new(LoginStore::new(Duration::from_secs(30), 10));
        store.begin(None).await.unwrap();
        let handle = spawn_sweeper(store.clone(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.is_empty().await);
        handle.abort();
    }

    #[test]
    fn return_to_accepts_local_paths() {
        assert_eq!(sanitize_return_to(Some("/profile")), "/profile");
        assert_eq!(sanitize_return_to(Some("/a/b?c=d#e")), "/a/b?c=d#e");
        assert_eq!(sanitize_return_to(None), "/");
    }

    #[test]
    fn return_to_rejects_other_origins() {
        for bad in [
            "https://evil.example.com/",
            "//evil.example.com",
            "/\\evil.example.com",
            "profile",
            "",
            "/line\nbreak",
        ] {
            assert_eq!(sanitize_return_to(Some(bad)), "/", "accepted {bad:?}");
        }
        let long = format!("/{}", "a".repeat(MAX_RETURN_TO_LEN));
        assert_eq!(sanitize_return_to(Some(&long)), "/");
    }
}
