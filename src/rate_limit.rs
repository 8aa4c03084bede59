//! Window accounting primitives.
//!
//! This module provides the building blocks the decision engine counts with:
//! - [`WindowStore`]: storage interface for per-user window state (in `store`).
//! - [`strategies`]: the counting math (fixed window, sliding window counter).
//! - [`QuotaLayer`]: tower middleware that gates HTTP requests on a decision.
//!
//! # Architecture
//!
//! - **Middleware**: `QuotaLayer` wraps the upload service. It doesn't know *how*
//!   counting works, only that it should ask a `DecisionEngine`.
//! - **Logic**: `strategies` mutates one [`WindowState`] for one request.
//! - **Storage**: `WindowStore` owns the states, one per user id, and makes each
//!   check-and-increment atomic for that user without serialising other users.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::quota::UserQuota;

pub mod middleware;
pub mod store;
pub mod strategies;
pub use middleware::{QuotaLayer, QuotaService};
pub use store::{spawn_evictor, InMemoryWindowStore, WindowStore};

/// Counting algorithm used by a window store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAlgorithm {
    /// Count resets to zero once `window` has elapsed since `window_start`.
    #[default]
    FixedWindow,
    /// Weights the previous window's count by how much of it still overlaps.
    SlidingWindowCounter,
}

/// The slice of a quota the accounting table needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Max admitted requests per window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_millis: u64,
    /// Revision of the quota this budget was read from.
    pub revision: u64,
}

impl From<&UserQuota> for Budget {
    fn from(quota: &UserQuota) -> Self {
        Self { limit: quota.quota_limit, window_millis: quota.window_millis(), revision: quota.revision }
    }
}

/// Live accounting for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Requests admitted in the current window.
    pub count: u32,
    /// Requests admitted in the window right before this one.
    pub previous_count: u32,
    /// Start of the current window (millis on the engine clock).
    pub window_start: u64,
    /// Quota revision this state counts for.
    pub revision: u64,
    /// Window length of that revision.
    pub window_millis: u64,
    /// Last time a request touched this state.
    pub last_seen: u64,
}

impl WindowState {
    /// Empty window opened at `now_millis` under `budget`.
    pub fn fresh(budget: &Budget, now_millis: u64) -> Self {
        Self {
            count: 0,
            previous_count: 0,
            window_start: now_millis,
            revision: budget.revision,
            window_millis: budget.window_millis,
            last_seen: now_millis,
        }
    }

    /// Whether dropping this state can change a future decision.
    ///
    /// `spans` is how many windows past `window_start` the counts still matter:
    /// one for the fixed window, two for the sliding counter, whose previous
    /// window keeps weighing into the next one.
    pub fn is_expired(&self, now_millis: u64, idle_millis: u64, spans: u64) -> bool {
        let idle = now_millis.saturating_sub(self.last_seen) >= idle_millis;
        let closed = now_millis.saturating_sub(self.window_start) >= self.window_millis.max(1).saturating_mul(spans);
        idle && closed
    }
}

/// Outcome of a single check-and-increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Counted against the window.
    Allowed {
        /// Permits left in this window after this one.
        remaining: u32,
        /// Time until the window rolls over.
        reset_after: Duration,
    },
    /// Quota exhausted for this window.
    Denied {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
    },
    /// The stored state belongs to a newer quota revision than the caller read.
    /// Nothing was counted; re-read the quota and try again.
    Stale,
}

impl Admission {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Read-only view of a user's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub remaining: u32,
    /// Zero when no window is open yet.
    pub reset_after: Duration,
}
