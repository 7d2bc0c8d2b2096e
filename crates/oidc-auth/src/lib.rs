//! OpenID Connect relying-party core
//!
//! Everything between "user clicked login" and "request carries a valid
//! session", independent of the web framework:
//!
//! 1. `FlowController::start_login` stores a `LoginAttempt` (state, PKCE
//!    verifier, nonce) in the `LoginStore` and builds the authorization URL
//! 2. `FlowController::handle_callback` redeems the attempt, exchanges the
//!    code, validates the ID token and issues a session
//! 3. `SessionManager::verify` checks the encrypted session token on each
//!    request; `FlowController::logout` revokes it

pub mod constants;
pub mod error;
pub mod flow;
pub mod id_token;
pub mod pkce;
pub mod session;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{AuthError, Result, SessionError, StoreError};
pub use flow::{
    Authenticated, CallbackParams, FlowController, LoginEvent, LoginRedirect, LoginState,
    transition,
};
pub use id_token::{IdTokenValidator, ValidatedIdToken};
pub use session::{Session, SessionManager};
pub use store::{LoginAttempt, LoginStore, PendingLogin, sanitize_return_to, spawn_sweeper};
