//! Forwarding engine: relays captured events with bounded retry

mod engine;

pub use engine::{build_outbound, DeliveryOutcome, ForwardEngine, PendingDelivery, RetryPolicy};
