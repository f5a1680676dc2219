//! Replay engine: re-dispatches a saved event stream with controlled timing

mod engine;
mod schedule;

pub use engine::{ReplayReport, ReplaySession};
pub use schedule::SchedulePolicy;

/// Buffered outcome reports before the consumer must catch up
pub const REPORT_CHANNEL_DEPTH: usize = 32;
