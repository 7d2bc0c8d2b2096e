//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The file is YAML when it ends in `.yaml`/`.yml`, TOML otherwise. The
//! session key may come from `--key`/`OIDC_KEY` instead of the file; when
//! neither provides one a random key is generated, which invalidates all
//! sessions on restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use common::Secret;
use oidc_auth::constants::{MAX_LOGIN_TTL, MAX_SESSION_TTL};
use provider::ProviderSettings;
use serde::Deserialize;
use url::Url;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "oidc-demo", version, about = "OpenID Connect login demo")]
pub struct Cli {
    /// Path to the YAML or TOML config file
    #[arg(long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8091)]
    pub port: u16,

    /// Session encryption key (overrides `key` from the config file)
    #[arg(long, env = "OIDC_KEY", hide_env_values = true)]
    pub key: Option<String>,
}

/// Paths served by the app itself; the callback must not shadow them.
const RESERVED_PATHS: &[&str] = &["/", "/login", "/logout", "/profile", "/health", "/metrics"];

/// On-disk shape of the config file.
#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: Option<Secret<String>>,
    #[serde(default)]
    redirect_url: String,
    #[serde(default)]
    issuer: Option<String>,
    #[serde(default, alias = "zitadel_domain")]
    domain: Option<String>,
    #[serde(default, alias = "zitadel_port")]
    port: Option<u16>,
    #[serde(default)]
    key: Option<Secret<String>>,
    #[serde(default = "default_scopes")]
    scopes: Vec<String>,
    #[serde(default = "default_session_ttl")]
    session_ttl_secs: u64,
    #[serde(default = "default_login_ttl")]
    login_ttl_secs: u64,
    #[serde(default = "default_http_timeout")]
    http_timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    max_connections: usize,
    #[serde(default = "default_max_pending_logins")]
    max_pending_logins: usize,
    #[serde(default = "default_cookie_name")]
    cookie_name: String,
    #[serde(default)]
    post_logout_redirect_url: Option<String>,
}

fn default_scopes() -> Vec<String> {
    ["openid", "profile", "email"].map(String::from).to_vec()
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_login_ttl() -> u64 {
    600
}

fn default_http_timeout() -> u64 {
    10
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_pending_logins() -> usize {
    10_000
}

fn default_cookie_name() -> String {
    "oidc_session".to_string()
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
    pub redirect_url: String,
    pub issuer: String,
    pub key: Secret<String>,
    /// True when no key was configured and one was generated at startup
    pub key_generated: bool,
    pub scopes: Vec<String>,
    pub session_ttl: Duration,
    pub login_ttl: Duration,
    pub http_timeout: Duration,
    pub max_connections: usize,
    pub max_pending_logins: usize,
    pub cookie_name: String,
    pub post_logout_redirect_url: Option<String>,
}

impl Config {
    /// Load and validate the config file, applying a CLI/env key override.
    pub fn load(path: &Path, key_override: Option<String>) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: FileConfig = if is_yaml(path) {
            serde_yaml::from_str(&contents)?
        } else {
            toml::from_str(&contents)?
        };
        Self::from_file(file, key_override)
    }

    fn from_file(file: FileConfig, key_override: Option<String>) -> common::Result<Self> {
        if file.client_id.trim().is_empty() {
            return Err(invalid("client_id is required"));
        }

        let issuer = match (file.issuer, file.domain) {
            (Some(issuer), _) if !issuer.trim().is_empty() => issuer,
            (_, Some(domain)) if !domain.trim().is_empty() => issuer_from_domain(&domain, file.port),
            _ => return Err(invalid("issuer (or domain) is required")),
        };
        require_http_url("issuer", &issuer)?;

        let redirect = require_http_url("redirect_url", &file.redirect_url)?;
        if RESERVED_PATHS.contains(&redirect.path()) {
            return Err(invalid(&format!(
                "redirect_url path {} collides with an application route",
                redirect.path()
            )));
        }

        if let Some(url) = &file.post_logout_redirect_url {
            require_http_url("post_logout_redirect_url", url)?;
        }

        for (name, value) in [
            ("session_ttl_secs", file.session_ttl_secs),
            ("login_ttl_secs", file.login_ttl_secs),
            ("http_timeout_secs", file.http_timeout_secs),
            ("max_connections", file.max_connections as u64),
            ("max_pending_logins", file.max_pending_logins as u64),
        ] {
            if value == 0 {
                return Err(invalid(&format!("{name} must be greater than 0")));
            }
        }

        for (name, value, max) in [
            ("session_ttl_secs", file.session_ttl_secs, MAX_SESSION_TTL),
            ("login_ttl_secs", file.login_ttl_secs, MAX_LOGIN_TTL),
        ] {
            if value > max.as_secs() {
                return Err(invalid(&format!(
                    "{name} must be at most {}",
                    max.as_secs()
                )));
            }
        }

        if file.cookie_name.is_empty()
            || !file
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid("cookie_name must be non-empty [A-Za-z0-9_-]"));
        }

        let mut scopes: Vec<String> = file
            .scopes
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        if !scopes.iter().any(|s| s == "openid") {
            scopes.insert(0, "openid".to_string());
        }

        let configured_key = key_override
            .map(Secret::new)
            .or(file.key)
            .filter(|k| !k.is_blank());
        let key_generated = configured_key.is_none();
        let key = configured_key
            .unwrap_or_else(|| Secret::new(oidc_auth::pkce::random_token()));

        Ok(Self {
            client_id: file.client_id,
            client_secret: file.client_secret.filter(|s| !s.is_blank()),
            redirect_url: file.redirect_url,
            issuer,
            key,
            key_generated,
            scopes,
            session_ttl: Duration::from_secs(file.session_ttl_secs),
            login_ttl: Duration::from_secs(file.login_ttl_secs),
            http_timeout: Duration::from_secs(file.http_timeout_secs),
            max_connections: file.max_connections,
            max_pending_logins: file.max_pending_logins,
            cookie_name: file.cookie_name,
            post_logout_redirect_url: file.post_logout_redirect_url,
        })
    }

    /// Path component of `redirect_url`, where the callback route is mounted.
    pub fn callback_path(&self) -> String {
        Url::parse(&self.redirect_url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/callback".to_string())
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            issuer: self.issuer.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_url: self.redirect_url.clone(),
            scopes: self.scopes.clone(),
            timeout: self.http_timeout,
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    )
}

/// A bare domain means HTTPS on the default port; an explicit port is
/// taken to mean a local, plain-HTTP issuer.
fn issuer_from_domain(domain: &str, port: Option<u16>) -> String {
    let domain = domain.trim().trim_end_matches('/');
    match port {
        Some(port) => format!("http://{domain}:{port}"),
        None => format!("https://{domain}"),
    }
}

fn require_http_url(name: &str, value: &str) -> common::Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| invalid(&format!("{name} is not a valid URL ({value}): {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid(&format!(
            "{name} must be an http:// or https:// URL, got: {value}"
        )));
    }
    Ok(url)
}

fn invalid(message: &str) -> common::Error {
    common::Error::Config(message.to_string())
}
