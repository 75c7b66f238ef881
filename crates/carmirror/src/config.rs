//! Service configuration.

use std::time::Duration;

use carmirror_core::HashRegistry;
use carmirror_sync::{MirrorConfig, MirrorError, Result};
use serde::Deserialize;

/// Configuration for a [`CarMirror`](crate::CarMirror) instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CarMirrorConfig {
    /// Reconciliation settings shared by the requester and provider sides.
    pub mirror: MirrorConfig,
    /// Address the HTTP surface listens on, e.g. `127.0.0.1:8080`.
    pub http_remote_addr: Option<String>,
    /// Timeout for a single request to a remote provider.
    pub request_timeout: Duration,
}

impl Default for CarMirrorConfig {
    fn default() -> Self {
        Self {
            mirror: MirrorConfig::default(),
            http_remote_addr: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl CarMirrorConfig {
    /// Parse from JSON; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| MirrorError::Config(e.to_string()))
    }

    pub fn validate(&self, registry: &HashRegistry) -> Result<()> {
        self.mirror.validate(registry)?;
        if let Some(addr) = &self.http_remote_addr {
            if addr.trim().is_empty() {
                return Err(MirrorError::Config("http_remote_addr is empty".into()));
            }
        }
        if self.request_timeout.is_zero() {
            return Err(MirrorError::Config("request_timeout must be non-zero".into()));
        }
        Ok(())
    }
}
