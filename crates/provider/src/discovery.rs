//! OpenID Connect discovery
//!
//! Resolves `{issuer}/.well-known/openid-configuration` into the endpoints
//! the relying party needs. The document's `issuer` must match the
//! configured issuer exactly (modulo a trailing slash), otherwise tokens
//! from a different issuer could be accepted.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use crate::{ProviderError, Result};

/// Well-known path appended to the issuer URL.
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Subset of the OpenID Provider Metadata the relying party consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Option<Vec<String>>,
    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProviderMetadata {
    /// Reject documents that cannot support an authorization-code + PKCE login.
    pub fn validate(&self, expected_issuer: &str) -> Result<()> {
        if trim_issuer(&self.issuer) != trim_issuer(expected_issuer) {
            return Err(ProviderError::Discovery(format!(
                "issuer mismatch: configured {expected_issuer}, discovered {}",
                self.issuer
            )));
        }

        for (name, value) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("jwks_uri", &self.jwks_uri),
        ] {
            if value.trim().is_empty() {
                return Err(ProviderError::Discovery(format!(
                    "discovery document is missing {name}"
                )));
            }
        }

        // Absent means "not advertised"; many issuers support S256 silently.
        if self
            .code_challenge_methods_supported
            .as_ref()
            .is_some_and(|methods| !methods.iter().any(|m| m == "S256"))
        {
            return Err(ProviderError::Discovery(
                "issuer does not support the S256 code challenge method".into(),
            ));
        }

        Ok(())
    }

    /// Requested scopes missing from `scopes_supported`. Empty when the
    /// issuer publishes no list.
    pub fn unadvertised_scopes<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        let Some(supported) = &self.scopes_supported else {
            return Vec::new();
        };
        requested
            .iter()
            .filter(|scope| !supported.contains(*scope))
            .map(String::as_str)
            .collect()
    }

    /// Whether the issuer signs ID tokens with at least one asymmetric
    /// algorithm. `true` when it publishes no list.
    pub fn signs_asymmetrically(&self) -> bool {
        self.id_token_signing_alg_values_supported
            .as_ref()
            .is_none_or(|algs| {
                algs.iter().any(|alg| {
                    alg.starts_with("RS")
                        || alg.starts_with("PS")
                        || alg.starts_with("ES")
                        || alg == "EdDSA"
                })
            })
    }
}

/// Discovery URL for an issuer.
pub fn well_known_url(issuer: &str) -> String {
    format!("{}{WELL_KNOWN_PATH}", trim_issuer(issuer))
}

fn trim_issuer(issuer: &str) -> &str {
    issuer.trim_end_matches('/')
}

/// Fetch and validate the discovery document for `issuer`.
pub async fn fetch_metadata(client: &reqwest::Client, issuer: &str) -> Result<ProviderMetadata> {
    let url = well_known_url(issuer);
    debug!(url = %url, "fetching discovery document");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ProviderError::Transport(format!("discovery request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(ProviderError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let metadata: ProviderMetadata = response
        .json()
        .await
        .map_err(|e| ProviderError::InvalidResponse(format!("discovery document: {e}")))?;

    metadata.validate(issuer)?;
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_json(issuer: &str) -> serde_json::Value {
        serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/oauth/v2/authorize"),
            "token_endpoint": format!("{issuer}/oauth/v2/token"),
            "jwks_uri": format!("{issuer}/oauth/v2/keys"),
            "userinfo_endpoint": format!("{issuer}/oidc/v1/userinfo"),
            "end_session_endpoint": format!("{issuer}/oidc/v1/end_session"),
            "code_challenge_methods_supported": ["S256"],
            "grant_types_supported": ["authorization_code", "refresh_token"]
        })
    }

    #[test]
    fn well_known_url_strips_trailing_slash() {
        assert_eq!(
            well_known_url("https://id.example.com/"),
            "https://id.example.com/.well-known/openid-configuration"
        );
        assert_eq!(
            well_known_url("http://localhost:8080"),
            "http://localhost:8080/.well-known/openid-configuration"
        );
    }

    #[test]
    fn unknown_fields_land_in_extra() {
        let metadata: ProviderMetadata =
            serde_json::from_value(metadata_json("https://id.example.com")).unwrap();
        assert!(metadata.extra.contains_key("grant_types_supported"));
        assert!(metadata.validate("https://id.example.com/").is_ok());
    }

    #[test]
    fn unadvertised_scopes_are_listed() {
        let mut json = metadata_json("https://id.example.com");
        json["scopes_supported"] = serde_json::json!(["openid", "profile"]);
        let metadata: ProviderMetadata = serde_json::from_value(json).unwrap();

        let requested = vec!["openid".to_string(), "email".to_string()];
        assert_eq!(metadata.unadvertised_scopes(&requested), vec!["email"]);

        let silent: ProviderMetadata =
            serde_json::from_value(metadata_json("https://id.example.com")).unwrap();
        assert!(silent.unadvertised_scopes(&requested).is_empty());
    }

    #[test]
    fn symmetric_only_signing_is_detected() {
        let mut json = metadata_json("https://id.example.com");
        json["id_token_signing_alg_values_supported"] = serde_json::json!(["HS256"]);
        let metadata: ProviderMetadata = serde_json::from_value(json.clone()).unwrap();
        assert!(!metadata.signs_asymmetrically());

        json["id_token_signing_alg_values_supported"] = serde_json::json!(["HS256", "RS256"]);
        let metadata: ProviderMetadata = serde_json::from_value(json).unwrap();
        assert!(metadata.signs_asymmetrically());

        let silent: ProviderMetadata =
            serde_json::from_value(metadata_json("https://id.example.com")).unwrap();
        assert!(silent.signs_asymmetrically());
    }

    #[test]
    fn issuer_mismatch_is_rejected() {
        let metadata: ProviderMetadata =
            serde_json::from_value(metadata_json("https://evil.example.com")).unwrap();
        let err = metadata.validate("https://id.example.com").unwrap_err();
        assert!(err.to_string().contains("issuer mismatch"), "got: {err}");
    }

    #[test]
    fn plain_only_pkce_is_rejected() {
        let mut json = metadata_json("https://id.example.com");
        json["code_challenge_methods_supported"] = serde_json::json!(["plain"]);
        let metadata: ProviderMetadata = serde_json::from_value(json).unwrap();
        assert!(metadata.validate("https://id.example.com").is_err());
    }

    #[test]
    fn missing_pkce_advertisement_is_accepted() {
        let mut json = metadata_json("https://id.example.com");
        json.as_object_mut()
            .unwrap()
            .remove("code_challenge_methods_supported");
        let metadata: ProviderMetadata = serde_json::from_value(json).unwrap();
        assert!(metadata.validate("https://id.example.com").is_ok());
    }
}
