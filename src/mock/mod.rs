//! Mock response engine with scripted, optionally stateful responses

mod engine;
mod matcher;
mod spec;

pub use engine::{MockEngine, MockResponse, MockStats};
pub use spec::{MockSpec, ResponseDefaults, ResponseEntry, ResponseRule};

/// Ceiling applied to configured response delays
pub const MAX_DELAY_SECS: f64 = 30.0;

/// Reserved path prefix for the mock server's control endpoints
pub const CONTROL_PREFIX: &str = "/__mock__/";
