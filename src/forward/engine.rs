//! Relay of captured events to a live target, with retry and backoff

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::config::ForwardConfig;
use crate::dispatch::{join_url, DispatchHandle, DispatchPool, OutboundRequest};
use crate::event::Event;
use crate::{HooksinkError, Result};

/// Retry policy shared by forwarding and replay dispatch
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retry attempts after the initial dispatch
    pub max_retries: u32,
    /// Base backoff delay; retry `n` waits `base * 2^(n-1)`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay applied before retry `n` (1-based)
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

impl From<&ForwardConfig> for RetryPolicy {
    fn from(config: &ForwardConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

/// Terminal result of delivering one event
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Target answered with a status below 400
    Delivered {
        /// Status reported by the target
        status: u16,
        /// Total attempts used
        attempts: u32,
    },
    /// Target answered 4xx; understood and explicitly rejected, not retried
    Rejected {
        /// Status reported by the target
        status: u16,
        /// Total attempts used
        attempts: u32,
    },
    /// Retries exhausted or a non-retryable failure occurred
    Failed {
        /// Last observed error
        error: HooksinkError,
        /// Total attempts used
        attempts: u32,
    },
}

impl DeliveryOutcome {
    /// Whether the target accepted the event
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Forwarding engine: fire-and-continue relay through the dispatch pool.
///
/// Submission never blocks the ingestion path beyond enqueueing; outcomes
/// are reported to the log, never raised to the caller.
#[derive(Clone)]
pub struct ForwardEngine {
    pool: DispatchPool,
    target_url: String,
    policy: RetryPolicy,
}

impl ForwardEngine {
    /// Create an engine dispatching to `target_url` through `pool`
    #[must_use]
    pub fn new(pool: DispatchPool, target_url: String, policy: RetryPolicy) -> Self {
        Self {
            pool,
            target_url,
            policy,
        }
    }

    /// Target base URL this engine dispatches to
    #[must_use]
    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Relay an event without blocking the caller beyond task submission.
    ///
    /// The outcome is reported to the log; a failure terminates only the
    /// forwarding task, never the ingestion path.
    pub fn spawn_forward(&self, event: Arc<Event>) {
        let engine = self.clone();

        tokio::spawn(async move {
            match engine.deliver(&event).await {
                DeliveryOutcome::Delivered { status, attempts } => {
                    info!(
                        "Forwarded {} {} to {}: {} ({} attempt(s))",
                        event.method, event.path, engine.target_url, status, attempts
                    );
                }
                DeliveryOutcome::Rejected { status, attempts } => {
                    warn!(
                        "Forward of {} {} rejected by {}: {} ({} attempt(s))",
                        event.method, event.path, engine.target_url, status, attempts
                    );
                }
                DeliveryOutcome::Failed { error, attempts } => {
                    error!(
                        "Failed to forward {} {} after {} attempt(s): {}",
                        event.method, event.path, attempts, error
                    );
                }
            }
        });
    }

    /// Deliver one event, retrying per the policy
    pub async fn deliver(&self, event: &Event) -> DeliveryOutcome {
        self.begin(event).outcome().await
    }

    /// Submit the first attempt immediately, deferring the rest.
    ///
    /// The initial dispatch enters the pool before this returns, which lets
    /// the replay engine pin initiation order to the source sequence.
    #[must_use]
    pub fn begin(&self, event: &Event) -> PendingDelivery {
        let request = build_outbound(event, &self.target_url);
        let first = self.pool.submit(request.clone());

        PendingDelivery {
            engine: self.clone(),
            request,
            first,
            method: event.method.clone(),
            path: event.path.clone(),
        }
    }

    /// Run the retry loop after the initial submission.
    ///
    /// Each retry is resubmitted through the pool, so it competes fairly for
    /// concurrency slots with unrelated work. Backpressure counts as one
    /// retryable attempt.
    async fn drive(
        &self,
        request: OutboundRequest,
        mut pending: Result<DispatchHandle>,
        method: &str,
        path: &str,
    ) -> DeliveryOutcome {
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            let last_error = match pending {
                Ok(handle) => match handle.outcome().await {
                    Ok(response) if response.status < 400 => {
                        return DeliveryOutcome::Delivered {
                            status: response.status,
                            attempts,
                        };
                    }
                    Ok(response) if response.status < 500 => {
                        return DeliveryOutcome::Rejected {
                            status: response.status,
                            attempts,
                        };
                    }
                    Ok(response) => HooksinkError::UpstreamError {
                        status: response.status,
                    },
                    Err(error) => error,
                },
                Err(error) => error,
            };

            let retries_used = attempts - 1;
            if !last_error.is_retryable() || retries_used >= self.policy.max_retries {
                return DeliveryOutcome::Failed {
                    error: last_error,
                    attempts,
                };
            }

            let delay = self.policy.backoff_delay(retries_used + 1);
            debug!(
                "Attempt {} for {} {} failed ({}), retrying in {:?}",
                attempts, method, path, last_error, delay
            );
            tokio::time::sleep(delay).await;

            pending = self.pool.submit(request.clone());
        }
    }
}

/// A delivery whose first attempt has already been submitted
pub struct PendingDelivery {
    engine: ForwardEngine,
    request: OutboundRequest,
    first: Result<DispatchHandle>,
    method: String,
    path: String,
}

impl PendingDelivery {
    /// Wait out the first attempt and any retries
    pub async fn outcome(self) -> DeliveryOutcome {
        self.engine
            .drive(self.request, self.first, &self.method, &self.path)
            .await
    }
}

/// Build the outbound request for an event: method and path are copied, the
/// `Host` header is dropped, and the captured body is re-sent as-is
#[must_use]
pub fn build_outbound(event: &Event, target_url: &str) -> OutboundRequest {
    let mut headers: Vec<(String, String)> = event
        .headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("host"))
        .cloned()
        .collect();

    let body = if let Some(ref json) = event.json {
        headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
        headers.push(("content-type".to_string(), "application/json".to_string()));
        Bytes::from(serde_json::to_vec(json).expect("JSON value serialization cannot fail"))
    } else if let Some(ref raw) = event.raw {
        Bytes::from(raw.clone().into_bytes())
    } else {
        Bytes::new()
    };

    OutboundRequest {
        method: event.method.clone(),
        url: join_url(target_url, &event.path),
        headers,
        body,
    }
}
