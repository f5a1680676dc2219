//! Error types for Hooksink

use std::io;
use thiserror::Error;

/// Result type for Hooksink operations
pub type Result<T> = std::result::Result<T, HooksinkError>;

/// Errors that can occur in Hooksink
#[derive(Debug, Error)]
pub enum HooksinkError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error (invalid mock spec, route pattern, or parameter).
    /// Fatal at load time, never raised at request time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dispatch pool queue is full; recoverable, counts as one attempt
    #[error("Dispatch queue full, submission rejected")]
    Backpressure,

    /// Connection refused, DNS failure, timeout; retryable
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Target responded with a 5xx status; retryable
    #[error("Upstream error: target responded {status}")]
    UpstreamError {
        /// Status code reported by the target
        status: u16,
    },

    /// Target responded with a 4xx status; terminal, not retried
    #[error("Upstream rejected request with {status}")]
    UpstreamRejected {
        /// Status code reported by the target
        status: u16,
    },

    /// A saved event log line that cannot be parsed
    #[error("Invalid event record on line {line}: {reason}")]
    InvalidRecord {
        /// 1-based line number in the log file
        line: usize,
        /// Parse failure description
        reason: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl HooksinkError {
    /// Whether a forwarding/replay attempt that failed with this error may be
    /// retried under the backoff policy
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Backpressure | Self::Transport(_) | Self::UpstreamError { .. }
        )
    }
}
