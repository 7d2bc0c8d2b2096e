//! Shared types for the OIDC demo workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
