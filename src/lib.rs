//! Hooksink - local webhook sink with capture, scripted mocks, and timed replay
//!
//! Captures arbitrary inbound HTTP requests, optionally persists them to an
//! append-only JSONL log, forwards them to a live target with bounded
//! concurrency and retry, and replays saved streams with original or scaled
//! timing.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod forward;
pub mod ingest;
pub mod mock;
pub mod replay;
pub mod server;
pub mod storage;

pub use error::{HooksinkError, Result};
