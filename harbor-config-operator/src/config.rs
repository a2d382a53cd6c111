//! Runtime configuration.

use std::time::Duration;

/// Finalizer attached to every managed `HarborConfiguration`.
pub const FINALIZER: &str = "administration.harbor.configuration/finalizer";

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum number of objects reconciled concurrently.
    pub workers: usize,
    /// How often the object store is polled for changes.
    pub poll_interval: Duration,
    /// Re-run a successful object after this long even without changes.
    pub resync_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Deadline for a whole reconciliation pass.
    pub reconcile_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(2),
            resync_interval: Duration::from_secs(10 * 60 * 60),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            reconcile_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// HTTP client settings for talking to Harbor.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            accept_invalid_certs: false,
        }
    }
}
