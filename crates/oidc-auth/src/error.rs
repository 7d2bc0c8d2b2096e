//! Error types for the login flow, the login store and sessions

/// Errors from completing or starting a login.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("callback state does not match a pending login")]
    StateMismatch,

    #[error("login attempt expired")]
    LoginExpired,

    #[error("identity provider rejected the login: {error}")]
    ProviderRejected {
        error: String,
        description: Option<String>,
    },

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("ID token rejected: {0}")]
    TokenInvalid(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("too many logins in progress")]
    StoreFull,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateMismatch => "state_mismatch",
            Self::LoginExpired => "login_expired",
            Self::ProviderRejected { .. } => "provider_rejected",
            Self::TokenExchange(_) => "token_exchange",
            Self::TokenInvalid(_) => "token_invalid",
            Self::Session(_) => "session",
            Self::StoreFull => "store_full",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::StateMismatch,
            StoreError::Expired => Self::LoginExpired,
            StoreError::Full => Self::StoreFull,
        }
    }
}

/// Errors from the pending-login store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no pending login for this state")]
    NotFound,

    #[error("login attempt expired")]
    Expired,

    #[error("pending login limit reached")]
    Full,
}

/// Errors from issuing or verifying a session token.
///
/// `Invalid` and `Expired` share one message so a client cannot tell a
/// forged token from a stale one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session")]
    Invalid,

    #[error("invalid session")]
    Expired,

    #[error("session token too large ({0} bytes)")]
    TooLarge(usize),

    #[error("session could not be encoded: {0}")]
    Encode(String),
}

/// Result alias for login flow operations.
pub type Result<T> = std::result::Result<T, AuthError>;
