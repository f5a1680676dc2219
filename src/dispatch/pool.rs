//! Dispatch pool with bounded concurrency and a bounded FIFO queue

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::LimitsConfig;
use crate::{HooksinkError, Result};

use super::client::{OutboundClient, OutboundRequest, OutboundResponse};
use super::CANCEL_SETTLE_MS;

/// Bounded-concurrency task executor wrapping the shared outbound client.
///
/// At most `max_concurrency` dispatches run at once; up to `queue_depth`
/// more wait in FIFO order. Beyond that, submission fails immediately with
/// `Backpressure` instead of growing unbounded memory.
#[derive(Clone)]
pub struct DispatchPool {
    client: Arc<OutboundClient>,
    slots: Arc<Semaphore>,
    queue: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    accepting: Arc<AtomicBool>,
    outstanding: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    request_timeout: Duration,
    max_concurrency: usize,
    queue_depth: usize,
}

/// Where a submission landed at submit time
enum Slot {
    /// A concurrency slot was free; the dispatch starts immediately
    Ready(OwnedSemaphorePermit),
    /// Queued; holds a queue permit until a concurrency slot frees up
    Queued(OwnedSemaphorePermit),
}

impl DispatchPool {
    /// Create a pool sized from the configured limits
    #[must_use]
    pub fn new(limits: &LimitsConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            client: Arc::new(OutboundClient::new()),
            slots: Arc::new(Semaphore::new(limits.max_concurrency)),
            queue: Arc::new(Semaphore::new(limits.queue_depth)),
            shutdown_tx,
            accepting: Arc::new(AtomicBool::new(true)),
            outstanding: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            request_timeout: limits.request_timeout(),
            max_concurrency: limits.max_concurrency,
            queue_depth: limits.queue_depth,
        }
    }

    /// Submit an outbound request for dispatch.
    ///
    /// Never waits: the request either starts, is queued, or is rejected.
    ///
    /// # Errors
    ///
    /// Returns `Backpressure` when the queue is at capacity or the pool is
    /// draining.
    pub fn submit(&self, request: OutboundRequest) -> Result<DispatchHandle> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(HooksinkError::Backpressure);
        }

        let slot = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => Slot::Ready(permit),
            Err(_) => match Arc::clone(&self.queue).try_acquire_owned() {
                Ok(queued) => Slot::Queued(queued),
                Err(_) => return Err(HooksinkError::Backpressure),
            },
        };

        let (tx, rx) = oneshot::channel();
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        let client = Arc::clone(&self.client);
        let slots = Arc::clone(&self.slots);
        let outstanding = Arc::clone(&self.outstanding);
        let idle = Arc::clone(&self.idle);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let request_timeout = self.request_timeout;

        tokio::spawn(async move {
            let result =
                run_dispatch(slot, slots, client, request_timeout, &mut shutdown_rx, request).await;

            // Receiver may have been dropped; the dispatch still counted
            let _ = tx.send(result);

            if outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
                idle.notify_waiters();
            }
        });

        Ok(DispatchHandle { rx })
    }

    /// Stop accepting submissions, wait up to `grace` for outstanding work,
    /// then force-cancel the remainder.
    ///
    /// Returns the number of dispatches that were force-cancelled.
    pub async fn drain(&self, grace: Duration) -> usize {
        self.accepting.store(false, Ordering::Release);
        debug!("Draining dispatch pool ({} outstanding)", self.in_flight());

        if tokio::time::timeout(grace, self.wait_idle()).await.is_ok() {
            return 0;
        }

        let remaining = self.in_flight();
        warn!("Drain grace expired, force-cancelling {remaining} dispatches");
        let _ = self.shutdown_tx.send(());

        let _ = tokio::time::timeout(Duration::from_millis(CANCEL_SETTLE_MS), self.wait_idle())
            .await;
        remaining
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before the check so a completion between the load and
            // the await cannot be missed
            notified.as_mut().enable();
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Dispatches currently running or queued
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Maximum concurrent dispatches (`C`)
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Maximum queued dispatches (`Q`)
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }
}

async fn run_dispatch(
    slot: Slot,
    slots: Arc<Semaphore>,
    client: Arc<OutboundClient>,
    request_timeout: Duration,
    shutdown_rx: &mut broadcast::Receiver<()>,
    request: OutboundRequest,
) -> Result<OutboundResponse> {
    let _permit = match slot {
        Slot::Ready(permit) => permit,
        Slot::Queued(queued) => {
            let acquired = tokio::select! {
                permit = Arc::clone(&slots).acquire_owned() => {
                    permit.map_err(|_| HooksinkError::Transport("pool closed".to_string()))?
                }
                _ = shutdown_rx.recv() => {
                    return Err(HooksinkError::Transport(
                        "cancelled while queued".to_string(),
                    ));
                }
            };
            drop(queued);
            acquired
        }
    };

    tokio::select! {
        result = tokio::time::timeout(request_timeout, client.send(&request)) => {
            match result {
                Ok(send_result) => send_result,
                Err(_) => Err(HooksinkError::Transport(format!(
                    "request timed out after {}ms",
                    request_timeout.as_millis()
                ))),
            }
        }
        _ = shutdown_rx.recv() => {
            Err(HooksinkError::Transport("cancelled during drain".to_string()))
        }
    }
}

/// Future resolving to the outcome of one submitted dispatch
pub struct DispatchHandle {
    rx: oneshot::Receiver<Result<OutboundResponse>>,
}

impl DispatchHandle {
    /// Wait for the dispatch to complete
    ///
    /// # Errors
    ///
    /// Returns the dispatch's transport error, or `Transport` if the task
    /// disappeared without reporting.
    pub async fn outcome(self) -> Result<OutboundResponse> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(HooksinkError::Transport("dispatch task dropped".to_string())))
    }
}
