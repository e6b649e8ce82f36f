//! Host preferences applied to the transport
//!
//! The host passes one `Preferences` value per run. These only shape the
//! HTTP client; pipeline-level cancellation stays with the caller's token.

use std::time::Duration;

/// Per-run transport preferences
#[derive(Debug, Clone)]
pub struct Preferences {
    /// Whole-request timeout enforced by the client
    pub request_timeout: Duration,
    /// Follow redirects up to `max_redirects`
    pub follow_redirects: bool,
    pub max_redirects: usize,
    /// Verify TLS certificates; hosts may disable for local development
    pub verify_tls: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            follow_redirects: true,
            max_redirects: 10,
            verify_tls: true,
        }
    }
}
