//! Configuration types for Hooksink

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::{HooksinkError, Result};

/// Operating mode for a running instance; exactly one is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Capture inbound requests, optionally save and forward them
    Listen,
    /// Answer inbound requests from a scripted mock specification
    Mock,
}

impl Mode {
    /// Check if mode is Listen
    #[must_use]
    pub fn is_listen(&self) -> bool {
        matches!(self, Mode::Listen)
    }

    /// Check if mode is Mock
    #[must_use]
    pub fn is_mock(&self) -> bool {
        matches!(self, Mode::Mock)
    }
}

/// Resource limits shared by the listener and the dispatch pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent outbound dispatches (`C`)
    pub max_concurrency: usize,
    /// Maximum queued outbound dispatches (`Q`); beyond this, submission
    /// fails with backpressure
    pub queue_depth: usize,
    /// Per-dispatch timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Grace period for draining in-flight work at shutdown, milliseconds
    pub drain_grace_ms: u64,
    /// Maximum inbound request body size in bytes
    pub max_request_size: usize,
    /// Maximum concurrent inbound connections
    pub max_inbound_connections: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            queue_depth: 1000,
            request_timeout_ms: 30_000,
            drain_grace_ms: 5000,
            max_request_size: 16 * 1024 * 1024, // 16 MB
            max_inbound_connections: 4096,
        }
    }
}

impl LimitsConfig {
    /// Per-dispatch timeout as a duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Drain grace period as a duration
    #[must_use]
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

/// Forwarding settings for listen mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Target base URL captured requests are relayed to
    pub target_url: String,
    /// Retry attempts after the initial dispatch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base delay in milliseconds; retry `n` waits `base * 2^(n-1)`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Configuration for a running server instance (listen or mock mode)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Operating mode
    pub mode: Mode,
    /// Append captured events to this JSONL file (listen mode)
    pub save_path: Option<PathBuf>,
    /// Mock specification document (mock mode)
    pub mock_spec: Option<PathBuf>,
    /// Forwarding settings (listen mode)
    pub forward: Option<ForwardConfig>,
    /// Pretty-print JSON bodies to the console
    #[serde(default)]
    pub pretty: bool,
    /// Suppress per-event console output
    #[serde(default)]
    pub quiet: bool,
    /// Shut down gracefully after this many captured events
    pub exit_after: Option<u64>,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl ServerConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(HooksinkError::Config("port cannot be 0".to_string()));
        }

        match self.mode {
            Mode::Mock => {
                if self.mock_spec.is_none() {
                    return Err(HooksinkError::Config(
                        "mock mode requires a spec file".to_string(),
                    ));
                }
                if self.forward.is_some() || self.save_path.is_some() {
                    return Err(HooksinkError::Config(
                        "mock mode does not save or forward".to_string(),
                    ));
                }
            }
            Mode::Listen => {
                if self.mock_spec.is_some() {
                    return Err(HooksinkError::Config(
                        "listen mode does not take a mock spec".to_string(),
                    ));
                }
            }
        }

        if let Some(ref save_path) = self.save_path {
            if let Some(parent) = save_path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(HooksinkError::Config(format!(
                        "save directory does not exist: {}",
                        parent.display()
                    )));
                }
            }
        }

        if let Some(ref forward) = self.forward {
            validate_target_url(&forward.target_url)?;
        }

        if self.exit_after == Some(0) {
            return Err(HooksinkError::Config(
                "exit-after must be at least 1".to_string(),
            ));
        }

        self.limits.validate()
    }
}

impl LimitsConfig {
    /// Validate limits
    ///
    /// # Errors
    ///
    /// Returns error if any limit is zero
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(HooksinkError::Config(
                "max_concurrency must be > 0".to_string(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(HooksinkError::Config("queue_depth must be > 0".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(HooksinkError::Config(
                "request_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.max_request_size == 0 {
            return Err(HooksinkError::Config(
                "max_request_size must be > 0".to_string(),
            ));
        }
        if self.max_inbound_connections == 0 {
            return Err(HooksinkError::Config(
                "max_inbound_connections must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for one replay invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Saved event log to replay
    pub events_file: PathBuf,
    /// Target base URL; without one, events are described but not dispatched
    pub target_url: Option<String>,
    /// Playback rate multiplier applied to original gaps (2.0 = twice as fast)
    pub rate: f64,
    /// Maximum dispatch rate; enforces a floor of `1/max_rps` between events
    pub max_rps: Option<f64>,
    /// Fixed inter-event delay in milliseconds, overriding original gaps
    pub fixed_delay_ms: Option<u64>,
    /// Stop after a single full pass
    pub once: bool,
    /// Retry attempts per event after the initial dispatch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Resource limits for the dispatch pool
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl ReplayConfig {
    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if !self.events_file.exists() {
            return Err(HooksinkError::Config(format!(
                "events file not found: {}",
                self.events_file.display()
            )));
        }

        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(HooksinkError::Config("rate must be positive".to_string()));
        }

        if let Some(max_rps) = self.max_rps {
            if !(max_rps.is_finite() && max_rps > 0.0) {
                return Err(HooksinkError::Config(
                    "max-rps must be positive".to_string(),
                ));
            }
        }

        if let Some(ref target) = self.target_url {
            validate_target_url(target)?;
        }

        self.limits.validate()
    }
}

/// Optional TOML file supplying limits and forward defaults; CLI flags win
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Resource limit overrides
    pub limits: Option<LimitsConfig>,
    /// Forward policy overrides
    pub forward: Option<ForwardDefaults>,
}

/// Forward policy defaults loadable from the config file
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardDefaults {
    /// Retry attempts after the initial dispatch
    pub max_retries: Option<u32>,
    /// Backoff base delay in milliseconds
    pub base_delay_ms: Option<u64>,
}

impl FileConfig {
    /// Load overrides from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HooksinkError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| HooksinkError::Config(format!("Failed to parse config: {e}")))
    }
}

/// Check that a target URL is an absolute http URL
///
/// # Errors
///
/// Returns `Config` error if the URL is unusable as a dispatch target
pub fn validate_target_url(url: &str) -> Result<()> {
    let uri: hyper::Uri = url
        .parse()
        .map_err(|e| HooksinkError::Config(format!("invalid target URL '{url}': {e}")))?;

    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => {
            return Err(HooksinkError::Config(format!(
                "unsupported target scheme '{other}' (only http is supported)"
            )));
        }
        None => {
            return Err(HooksinkError::Config(format!(
                "target URL must be absolute: '{url}'"
            )));
        }
    }

    if uri.authority().is_none() {
        return Err(HooksinkError::Config(format!(
            "target URL has no host: '{url}'"
        )));
    }

    Ok(())
}
