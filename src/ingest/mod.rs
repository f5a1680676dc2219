//! Ingestion coordinator: per-request fan-out to save and forward
//!
//! The coordinator never suspends beyond task submission: saving is a
//! flushed append, forwarding is fire-and-continue, and the caller gets an
//! immediate acknowledgement regardless of either outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::event::Event;
use crate::forward::ForwardEngine;
use crate::storage::EventLogWriter;

/// Per-request entry point for listen mode
pub struct IngestCoordinator {
    writer: Option<EventLogWriter>,
    forwarder: Option<ForwardEngine>,
    pretty: bool,
    quiet: bool,
    exit_after: Option<u64>,
    events_seen: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl IngestCoordinator {
    /// Create a coordinator; `shutdown_tx` is signalled when `exit_after`
    /// events have been captured
    #[must_use]
    pub fn new(
        writer: Option<EventLogWriter>,
        forwarder: Option<ForwardEngine>,
        pretty: bool,
        quiet: bool,
        exit_after: Option<u64>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            writer,
            forwarder,
            pretty,
            quiet,
            exit_after,
            events_seen: AtomicU64::new(0),
            shutdown_tx,
        }
    }

    /// Handle one captured event: report, save, forward, count.
    ///
    /// Save failures are logged and never block ingestion; forwarding is
    /// fire-and-continue.
    pub fn ingest(&self, event: Event) {
        if !self.quiet {
            self.report(&event);
        }

        if let Some(ref writer) = self.writer {
            if let Err(error) = writer.append(&event) {
                warn!("Failed to save event: {error}");
            }
        }

        if let Some(ref forwarder) = self.forwarder {
            forwarder.spawn_forward(Arc::new(event));
        }

        let seen = self.events_seen.fetch_add(1, Ordering::AcqRel) + 1;
        if self.exit_after == Some(seen) {
            info!("Received {seen} event(s), initiating graceful shutdown");
            let _ = self.shutdown_tx.send(());
        }
    }

    fn report(&self, event: &Event) {
        info!(
            "{} {} from {} ({})",
            event.method,
            event.path,
            event.ip,
            if event.json.is_some() {
                "json body"
            } else if event.raw.is_some() {
                "raw body"
            } else {
                "no body"
            }
        );

        if self.pretty {
            if let Some(ref json) = event.json {
                if let Ok(rendered) = serde_json::to_string_pretty(json) {
                    println!("{rendered}");
                }
            }
        }
    }

    /// Events captured so far
    #[must_use]
    pub fn events_seen(&self) -> u64 {
        self.events_seen.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn event(path: &str) -> Event {
        Event::from_parts("POST", path, vec![], vec![], b"payload", "127.0.0.1")
    }

    fn coordinator(
        writer: Option<EventLogWriter>,
        exit_after: Option<u64>,
    ) -> (IngestCoordinator, broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        (
            IngestCoordinator::new(writer, None, false, true, exit_after, shutdown_tx),
            shutdown_rx,
        )
    }

    #[tokio::test]
    async fn test_ingest_counts_events() {
        let (coordinator, _rx) = coordinator(None, None);

        coordinator.ingest(event("/a"));
        coordinator.ingest(event("/b"));

        assert_eq!(coordinator.events_seen(), 2);
    }

    #[tokio::test]
    async fn test_ingest_saves_when_configured() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("events.jsonl");
        let writer = EventLogWriter::open(&log_path).unwrap();
        let (coordinator, _rx) = coordinator(Some(writer), None);

        coordinator.ingest(event("/saved"));

        let saved = crate::storage::load_events(&log_path).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].path, "/saved");
    }

    #[tokio::test]
    async fn test_exit_after_triggers_shutdown() {
        let (coordinator, mut shutdown_rx) = coordinator(None, Some(2));

        coordinator.ingest(event("/one"));
        assert!(shutdown_rx.try_recv().is_err());

        coordinator.ingest(event("/two"));
        assert!(shutdown_rx.try_recv().is_ok());
    }
}
