//! Cryo Protocol - Delivery bookkeeping
//!
//! Implements:
//! - Monotonic ack id allocation
//! - Tracking of unacknowledged outbound data frames

mod ack;

pub use ack::*;
