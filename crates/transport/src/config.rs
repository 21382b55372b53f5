//! Transport configuration
//!
//! Settings that are forwarded to every request the transport makes. They
//! can be built in code or loaded from a TOML file:
//!
//! ```toml
//! timeout_ms = 5000
//! with_credentials = true
//! ```

use std::path::Path;
use std::time::Duration;

use eyre::WrapErr;
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Request timeout in milliseconds, enforced by the host. 0 or absent
    /// means no timeout.
    pub timeout_ms: Option<u32>,

    /// Send cookies and authorization headers with cross-site requests
    pub with_credentials: bool,
}

impl TransportConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(u64::from(ms)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        self
    }

    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    pub fn from_toml_str(contents: &str) -> eyre::Result<Self> {
        toml::from_str(contents).wrap_err("parsing transport config")
    }

    #[tracing::instrument]
    pub fn from_path(path: &Path) -> eyre::Result<Self> {
        tracing::debug!("loading transport config");
        let contents = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading transport config {}", path.display()))?;
        Self::from_toml_str(&contents)
    }
}
