//! Service lifecycle state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! `main.rs` executes the I/O implied by each action (discovering the
//! issuer, binding the listener, sleeping between retries).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Service lifecycle states.
///
/// Some fields are carried only for `Debug` output in lifecycle logs.
#[derive(Debug)]
#[allow(dead_code)]
pub enum ServiceState {
    /// Loading config
    Initializing,
    /// Fetching the issuer's discovery document
    Discovering { retries: u32, listen_addr: SocketAddr },
    /// Issuer known, binding the HTTP listener
    Starting { listen_addr: SocketAddr },
    /// Serving requests
    Running { listen_addr: SocketAddr },
    /// Graceful shutdown, finishing in-flight requests
    Draining { deadline: Instant },
    /// Terminal state
    Stopped { exit_code: i32 },
    /// Discovery failed, waiting to retry
    Error {
        error: String,
        retries: u32,
        listen_addr: SocketAddr,
    },
}

#[derive(Debug)]
pub enum ServiceEvent {
    ConfigLoaded { listen_addr: SocketAddr },
    ProviderDiscovered,
    /// `retryable` is false for answers that will not change on retry
    /// (issuer mismatch, 4xx, malformed document)
    DiscoveryFailed { error: String, retryable: bool },
    ListenerReady,
    /// SIGTERM/SIGINT received
    ShutdownSignal,
    /// Drain deadline exceeded
    DrainTimeout,
    /// Retry backoff expired
    RetryTimer,
}

/// Actions the caller should execute after a state transition
#[derive(Debug)]
pub enum ServiceAction {
    /// Fetch the discovery document
    Discover,
    /// Bind HTTP listener on the given address
    StartListener { addr: SocketAddr },
    /// Set retry timer
    ScheduleRetry { delay: Duration },
    /// Exit the process
    Shutdown { exit_code: i32 },
    /// No-op
    None,
}

/// Discovery retries before giving up
pub const MAX_DISCOVERY_RETRIES: u32 = 5;

/// Upper bound on draining in-flight requests after a shutdown signal
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: ServiceState, event: ServiceEvent) -> (ServiceState, ServiceAction) {
    match (state, event) {
        (ServiceState::Initializing, ServiceEvent::ConfigLoaded { listen_addr }) => (
            ServiceState::Discovering {
                retries: 0,
                listen_addr,
            },
            ServiceAction::Discover,
        ),

        // --- Discovering ---
        (ServiceState::Discovering { listen_addr, .. }, ServiceEvent::ProviderDiscovered) => (
            ServiceState::Starting { listen_addr },
            ServiceAction::StartListener { addr: listen_addr },
        ),

        (
            ServiceState::Discovering {
                retries,
                listen_addr,
            },
            ServiceEvent::DiscoveryFailed {
                error,
                retryable: true,
            },
        ) if retries < MAX_DISCOVERY_RETRIES => (
            ServiceState::Error {
                error,
                retries,
                listen_addr,
            },
            ServiceAction::ScheduleRetry {
                delay: Duration::from_secs(2u64.pow(retries)),
            },
        ),

        (ServiceState::Discovering { .. }, ServiceEvent::DiscoveryFailed { .. }) => (
            ServiceState::Stopped { exit_code: 1 },
            ServiceAction::Shutdown { exit_code: 1 },
        ),

        (
            ServiceState::Error {
                retries,
                listen_addr,
                ..
            },
            ServiceEvent::RetryTimer,
        ) => (
            ServiceState::Discovering {
                retries: retries + 1,
                listen_addr,
            },
            ServiceAction::Discover,
        ),

        // --- Starting / Running ---
        (ServiceState::Starting { listen_addr }, ServiceEvent::ListenerReady) => (
            ServiceState::Running { listen_addr },
            ServiceAction::None,
        ),

        (ServiceState::Running { .. }, ServiceEvent::ShutdownSignal) => (
            ServiceState::Draining {
                deadline: Instant::now() + DRAIN_TIMEOUT,
            },
            ServiceAction::None,
        ),

        (ServiceState::Draining { .. }, ServiceEvent::DrainTimeout) => (
            ServiceState::Stopped { exit_code: 0 },
            ServiceAction::Shutdown { exit_code: 0 },
        ),

        // Shutdown before the listener is up: nothing to drain
        (_, ServiceEvent::ShutdownSignal) => (
            ServiceState::Stopped { exit_code: 0 },
            ServiceAction::Shutdown { exit_code: 0 },
        ),

        // Unhandled transition: stay put
        (state, _event) => (state, ServiceAction::None),
    }
}
