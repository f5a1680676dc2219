//! Mock engine: route resolution plus per-rule sequence cursors

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::Result;

use super::matcher;
use super::spec::{MockSpec, ResponseEntry, ResponseRule};
use super::MAX_DELAY_SECS;

/// The response selected for one inbound request
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    /// Response status code
    pub status: u16,
    /// Literal JSON body
    pub body: Value,
    /// Delay to apply before responding; never blocks unrelated requests
    pub delay: Duration,
}

/// Mock engine owning the loaded spec and all per-rule sequence state.
///
/// Sequence cursors are keyed by (pattern, method key) and incremented
/// atomically, so concurrent calls to the same route cycle through a
/// sequence without skipping or duplicating entries.
pub struct MockEngine {
    spec: MockSpec,
    cursors: DashMap<(String, String), AtomicUsize>,
    call_counts: DashMap<String, u64>,
}

impl MockEngine {
    /// Create an engine from an already-validated spec
    #[must_use]
    pub fn new(spec: MockSpec) -> Self {
        Self {
            spec,
            cursors: DashMap::new(),
            call_counts: DashMap::new(),
        }
    }

    /// Load a spec file and build an engine from it
    ///
    /// # Errors
    ///
    /// Returns `Config` error if the document is unreadable or invalid
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::new(MockSpec::from_file(path)?))
    }

    /// Select the scripted response for an inbound request.
    ///
    /// Never fails: an unmatched request gets the spec defaults. The caller
    /// is responsible for honoring `delay` with a non-blocking sleep.
    pub fn respond(&self, path: &str, method: &str) -> MockResponse {
        let method = method.to_ascii_uppercase();

        *self
            .call_counts
            .entry(format!("{method} {path}"))
            .or_insert(0) += 1;

        let Some(resolved) = matcher::resolve(&self.spec, path, &method) else {
            debug!("No route for {} {}, using defaults", method, path);
            return self.merge(&ResponseEntry {
                status: None,
                body: None,
                delay: None,
            });
        };

        let entry = match resolved.rule {
            ResponseRule::Single(entry) => entry,
            ResponseRule::Sequence(entries) => {
                let key = (
                    resolved.pattern.to_string(),
                    resolved.method_key.to_string(),
                );
                let cursor = self.cursors.entry(key).or_insert_with(|| AtomicUsize::new(0));
                let index = cursor.fetch_add(1, Ordering::Relaxed) % entries.len();
                &entries[index]
            }
        };

        let response = self.merge(entry);
        debug!(
            "{} {} -> {} via {}",
            method, path, response.status, resolved.pattern
        );
        response
    }

    /// Fill omitted entry fields from the spec defaults
    fn merge(&self, entry: &ResponseEntry) -> MockResponse {
        let defaults = &self.spec.defaults;
        let delay_secs = entry
            .delay
            .unwrap_or(defaults.delay)
            .min(MAX_DELAY_SECS);

        MockResponse {
            status: entry.status.unwrap_or(defaults.status),
            body: entry.body.clone().unwrap_or_else(|| defaults.body.clone()),
            delay: Duration::from_secs_f64(delay_secs),
        }
    }

    /// Snapshot of call counts for the stats endpoint
    #[must_use]
    pub fn stats(&self) -> MockStats {
        let call_counts: BTreeMap<String, u64> = self
            .call_counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let total_calls = call_counts.values().sum();

        MockStats {
            call_counts,
            routes: self.spec.routes.keys().cloned().collect(),
            total_calls,
        }
    }

    /// Clear call counts and sequence cursors
    pub fn reset(&self) {
        self.call_counts.clear();
        self.cursors.clear();
    }

    /// Number of configured route patterns
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.spec.routes.len()
    }
}

/// Counters exposed by `GET /__mock__/stats`
#[derive(Debug, Clone, Serialize)]
pub struct MockStats {
    /// Calls per "METHOD /path"
    pub call_counts: BTreeMap<String, u64>,
    /// Configured route patterns
    pub routes: Vec<String>,
    /// Total calls since start or last reset
    pub total_calls: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn engine(doc: Value) -> MockEngine {
        let spec: MockSpec = serde_json::from_value(doc).unwrap();
        spec.validate().unwrap();
        MockEngine::new(spec)
    }

    #[test]
    fn test_single_rule_response() {
        let engine = engine(json!({
            "routes": {
                "/webhook": {"POST": {"status": 201, "body": {"created": true}}}
            }
        }));

        let response = engine.respond("/webhook", "post");
        assert_eq!(response.status, 201);
        assert_eq!(response.body, json!({"created": true}));
        assert_eq!(response.delay, Duration::ZERO);
    }

    #[test]
    fn test_defaults_when_unmatched() {
        let engine = engine(json!({
            "defaults": {"status": 404, "body": {"error": "nope"}},
            "routes": {}
        }));

        let response = engine.respond("/anything", "GET");
        assert_eq!(response.status, 404);
        assert_eq!(response.body, json!({"error": "nope"}));
    }

    #[test]
    fn test_omitted_fields_fall_back_per_field() {
        let engine = engine(json!({
            "defaults": {"status": 200, "delay": 0.25, "body": {"ok": true}},
            "routes": {
                "/partial": {"GET": {"status": 418}}
            }
        }));

        let response = engine.respond("/partial", "GET");
        assert_eq!(response.status, 418);
        assert_eq!(response.body, json!({"ok": true}));
        assert_eq!(response.delay, Duration::from_millis(250));
    }

    #[test]
    fn test_sequence_cycles_in_order() {
        let engine = engine(json!({
            "routes": {
                "/seq": {"ANY": [
                    {"status": 200},
                    {"status": 429},
                    {"status": 503}
                ]}
            }
        }));

        let statuses: Vec<u16> = (0..7).map(|_| engine.respond("/seq", "GET").status).collect();
        assert_eq!(statuses, vec![200, 429, 503, 200, 429, 503, 200]);
    }

    #[test]
    fn test_sequences_cycle_independently_per_rule() {
        let engine = engine(json!({
            "routes": {
                "/seq": {
                    "GET": [{"status": 200}, {"status": 500}],
                    "POST": [{"status": 201}, {"status": 202}]
                }
            }
        }));

        assert_eq!(engine.respond("/seq", "GET").status, 200);
        assert_eq!(engine.respond("/seq", "POST").status, 201);
        assert_eq!(engine.respond("/seq", "GET").status, 500);
        assert_eq!(engine.respond("/seq", "POST").status, 202);
    }

    #[test]
    fn test_delay_clamped() {
        let engine = engine(json!({
            "routes": {
                "/slow": {"GET": {"delay": 300.0}}
            }
        }));

        let response = engine.respond("/slow", "GET");
        assert_eq!(response.delay, Duration::from_secs_f64(MAX_DELAY_SECS));
    }

    #[test]
    fn test_stats_and_reset() {
        let engine = engine(json!({
            "routes": {"/a": {"ANY": {"status": 200}}}
        }));

        engine.respond("/a", "GET");
        engine.respond("/a", "GET");
        engine.respond("/b", "POST");

        let stats = engine.stats();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.call_counts["GET /a"], 2);
        assert_eq!(stats.call_counts["POST /b"], 1);
        assert_eq!(stats.routes, vec!["/a".to_string()]);

        engine.reset();
        assert_eq!(engine.stats().total_calls, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sequence_cycling_under_concurrency() {
        let engine = Arc::new(engine(json!({
            "routes": {
                "/seq": {"ANY": [
                    {"status": 200},
                    {"status": 201},
                    {"status": 202}
                ]}
            }
        })));

        let mut handles = Vec::new();
        for _ in 0..30 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine.respond("/seq", "GET").status
            }));
        }

        let mut counts = std::collections::BTreeMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_insert(0u32) += 1;
        }

        // 30 calls over a 3-entry sequence: each entry served exactly 10 times
        assert_eq!(counts[&200], 10);
        assert_eq!(counts[&201], 10);
        assert_eq!(counts[&202], 10);
    }
}
