//! Prometheus metrics exposition
//!
//! - `oidc_logins_started_total` (counter)
//! - `oidc_callbacks_total` (counter): label `outcome`
//! - `oidc_token_exchange_duration_seconds` (histogram)
//! - `oidc_session_checks_total` (counter): label `result`
//!
//! The login and callback metrics are emitted by the `oidc-auth` crate; this
//! module installs the recorder and owns the request-side metrics.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const EXCHANGE_DURATION: &str = "oidc_token_exchange_duration_seconds";

/// Token endpoint latency buckets, 10ms to the 10s default HTTP timeout
/// (plus one retry).
const EXCHANGE_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0];

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(EXCHANGE_DURATION.to_string()), EXCHANGE_BUCKETS)
        .context("failed to set histogram buckets")
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Outcome of checking a request's session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    Valid,
    Missing,
    Invalid,
}

impl SessionCheck {
    fn label(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Missing => "missing",
            Self::Invalid => "invalid",
        }
    }
}

pub fn record_session_check(result: SessionCheck) {
    metrics::counter!("oidc_session_checks_total", "result" => result.label()).increment(1);
}
