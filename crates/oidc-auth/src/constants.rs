//! Defaults and limits shared by the login flow and session handling

use std::time::Duration;

/// How long a login attempt may wait for its callback.
pub const DEFAULT_LOGIN_TTL: Duration = Duration::from_secs(10 * 60);

/// Lifetime of an issued session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Longest accepted login TTL.
pub const MAX_LOGIN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest accepted session TTL.
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Upper bound on concurrently pending login attempts.
pub const DEFAULT_MAX_PENDING_LOGINS: usize = 10_000;

/// Interval of the background sweep that drops expired login attempts.
pub const LOGIN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Clock skew tolerated on `exp`/`iat` when validating ID tokens.
pub const ID_TOKEN_LEEWAY_SECS: u64 = 60;

/// Longest `return_to` path kept across a login.
pub const MAX_RETURN_TO_LEN: usize = 2048;

/// Browsers drop cookies above ~4 KiB; leave room for the cookie attributes.
pub const MAX_SESSION_TOKEN_LEN: usize = 3800;

/// Prefix identifying the session token format version.
pub const SESSION_TOKEN_PREFIX: &str = "v1.";

/// Random bytes behind each state token and nonce.
pub const STATE_BYTES: usize = 32;

/// JWT claims that describe the token rather than the user; not copied into sessions.
pub const REGISTERED_CLAIMS: &[&str] = &[
    "iss", "aud", "exp", "iat", "nbf", "nonce", "at_hash", "c_hash", "azp", "auth_time", "jti",
    "sid",
];
