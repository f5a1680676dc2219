//! Bounded outbound dispatch shared by forwarding and replay
//!
//! A submitted task starts immediately while concurrency slots are free,
//! queues FIFO while the queue has room, and is rejected with backpressure
//! once the queue is full. One pooled client provides keep-alive connection
//! reuse per target origin.

mod client;
mod pool;

pub use client::{join_url, OutboundClient, OutboundRequest, OutboundResponse};
pub use pool::{DispatchHandle, DispatchPool};

/// Idle keep-alive timeout for pooled outbound connections
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Maximum idle pooled connections per target origin
pub const POOL_MAX_IDLE_PER_HOST: usize = 10;

/// How long force-cancelled tasks get to settle after a drain timeout
pub const CANCEL_SETTLE_MS: u64 = 100;
