//! Causality primitives - identifiers, timestamps, and sequence numbers
//!
//! Every event the kernel emits carries the session/turn/span identifier
//! quadruple plus a per-session monotonic sequence number. Identifiers are
//! opaque prefixed uuid-v4 strings; nothing in the kernel parses them back.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Generate a fresh session identifier (e.g. `ses-9f2c...`).
pub fn new_session_id() -> String {
    format!("ses-{}", Uuid::new_v4().simple())
}

/// Generate a fresh turn identifier, one per `execute` call.
pub fn new_turn_id() -> String {
    format!("turn-{}", Uuid::new_v4().simple())
}

/// Generate a fresh span identifier for a nested operation
/// (provider call, tool call, planning step).
pub fn new_span_id() -> String {
    format!("span-{}", Uuid::new_v4().simple())
}

/// Current time as an ISO-8601 UTC string with microsecond precision.
pub fn now() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Per-session monotonic sequence counter.
///
/// Starts at 1 and never decreases within a session; safe for concurrent
/// incrementing. Owned by the session's hook registry, which stamps every
/// emitted event.
#[derive(Debug)]
pub struct SeqClock {
    next: AtomicU64,
}

impl SeqClock {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Claim the next sequence number.
    pub fn next_seq(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The most recently issued sequence number (0 if none issued yet).
    pub fn last_seq(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for SeqClock {
    fn default() -> Self {
        Self::new()
    }
}
