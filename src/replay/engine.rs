//! Replay session: scheduled re-dispatch of a saved event sequence

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ReplayConfig;
use crate::dispatch::DispatchPool;
use crate::event::Event;
use crate::forward::{DeliveryOutcome, ForwardEngine, RetryPolicy};
use crate::storage;
use crate::Result;

use super::schedule::SchedulePolicy;
use super::REPORT_CHANNEL_DEPTH;

/// Outcome of one replayed event, delivered as the session progresses
#[derive(Debug)]
pub struct ReplayReport {
    /// Position in the source sequence (0-based)
    pub index: usize,
    /// Total events in the session
    pub total: usize,
    /// HTTP method of the replayed event
    pub method: String,
    /// Path of the replayed event
    pub path: String,
    /// Delivery outcome; `None` in dry-run mode (no target configured)
    pub outcome: Option<DeliveryOutcome>,
}

/// One scheduled re-dispatch of a captured event sequence.
///
/// A session makes exactly one pass; it never loops. Dispatch initiation
/// follows source order at the computed schedule, while deliveries (and
/// their retries) complete independently, so one slow or failing event
/// never stalls the rest of the schedule.
pub struct ReplaySession {
    events: Vec<Event>,
    dispatcher: Option<ForwardEngine>,
    policy: SchedulePolicy,
    cancel: CancellationToken,
    once: bool,
}

impl ReplaySession {
    /// Build a session over an already-loaded event sequence
    #[must_use]
    pub fn new(
        events: Vec<Event>,
        dispatcher: Option<ForwardEngine>,
        policy: SchedulePolicy,
        once: bool,
    ) -> Self {
        Self {
            events,
            dispatcher,
            policy,
            cancel: CancellationToken::new(),
            once,
        }
    }

    /// Load the configured event log and build a session from it
    ///
    /// # Errors
    ///
    /// Returns error if the config is invalid or the log cannot be read
    pub fn from_config(config: &ReplayConfig, pool: &DispatchPool) -> Result<Self> {
        config.validate()?;

        let events = storage::load_events(&config.events_file)?;

        let dispatcher = config.target_url.as_ref().map(|target| {
            ForwardEngine::new(
                pool.clone(),
                target.clone(),
                RetryPolicy {
                    max_retries: config.max_retries,
                    base_delay: Duration::from_millis(config.base_delay_ms),
                },
            )
        });

        let policy = SchedulePolicy::new(
            config.rate,
            config.max_rps,
            config.fixed_delay_ms.map(Duration::from_millis),
        );

        Ok(Self::new(events, dispatcher, policy, config.once))
    }

    /// Replace the session's cancellation token, so several passes can share
    /// one external cancel signal
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops scheduling when cancelled; already-submitted
    /// dispatches and their retries are allowed to finish
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of events in the session
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Whether the caller asked for a single pass only
    #[must_use]
    pub fn once(&self) -> bool {
        self.once
    }

    /// Start the session, consuming it.
    ///
    /// Returns a lazy, finite stream of per-event reports; the channel
    /// closes once every scheduled dispatch has reported.
    #[must_use]
    pub fn start(self) -> mpsc::Receiver<ReplayReport> {
        let (tx, rx) = mpsc::channel(REPORT_CHANNEL_DEPTH);
        tokio::spawn(self.run(tx));
        rx
    }

    async fn run(self, tx: mpsc::Sender<ReplayReport>) {
        let total = self.events.len();
        if total == 0 {
            info!("No events to replay");
            return;
        }

        info!("Replaying {} event(s)", total);
        let mut prev_timestamp = None;

        for (index, event) in self.events.into_iter().enumerate() {
            if let Some(prev) = prev_timestamp {
                let gap = self.policy.gap_between(prev, event.timestamp);
                if !gap.is_zero() {
                    tokio::select! {
                        () = tokio::time::sleep(gap) => {}
                        () = self.cancel.cancelled() => {}
                    }
                }
                if self.cancel.is_cancelled() {
                    info!("Replay cancelled after {index} of {total} event(s)");
                    break;
                }
            }
            prev_timestamp = Some(event.timestamp);

            debug!("[{}/{}] Replaying {} {}", index + 1, total, event.method, event.path);

            match &self.dispatcher {
                Some(engine) => {
                    let method = event.method.clone();
                    let path = event.path.clone();
                    // Submit now so initiation order matches source order;
                    // retries and completion run in their own task
                    let pending = engine.begin(&event);
                    let tx = tx.clone();

                    tokio::spawn(async move {
                        let outcome = pending.outcome().await;
                        let _ = tx
                            .send(ReplayReport {
                                index,
                                total,
                                method,
                                path,
                                outcome: Some(outcome),
                            })
                            .await;
                    });
                }
                None => {
                    let _ = tx
                        .send(ReplayReport {
                            index,
                            total,
                            method: event.method,
                            path: event.path,
                            outcome: None,
                        })
                        .await;
                }
            }
        }
    }
}
