use async_trait::async_trait;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::telemetry::{QuotaEvent, SharedSink};
use crate::rate_limit::strategies;
use crate::rate_limit::{Admission, Budget, WindowAlgorithm, WindowSnapshot, WindowState};

/// Abstract storage interface for per-user window state.
///
/// Implementations must make `try_admit` atomic per user id: two concurrent
/// calls for the same user can never both take the last permit. Calls for
/// different users must not wait on each other.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Check and count one request for `user_id` against `budget`.
    ///
    /// Returns [`Admission::Stale`] without counting if the stored state was
    /// created for a newer quota revision than `budget.revision`.
    async fn try_admit(&self, user_id: &str, budget: Budget, now_millis: u64) -> Result<Admission, Self::Error>;

    /// Inspect the user's window without counting.
    async fn peek(&self, user_id: &str, budget: Budget, now_millis: u64) -> Result<WindowSnapshot, Self::Error>;

    /// Drop the user's state so the next request opens a fresh window.
    ///
    /// Returns `true` if a state existed.
    async fn reset(&self, user_id: &str) -> Result<bool, Self::Error>;
}

/// Sharded in-memory window table.
///
/// Each user id hashes to one shard of a `DashMap`; the shard lock is held only
/// for the O(1) check-and-increment, never across an `.await`.
#[derive(Clone, Debug, Default)]
pub struct InMemoryWindowStore {
    entries: Arc<DashMap<String, WindowState>>,
    algorithm: WindowAlgorithm,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_algorithm(algorithm: WindowAlgorithm) -> Self {
        Self { entries: Arc::new(DashMap::new()), algorithm }
    }

    pub fn algorithm(&self) -> WindowAlgorithm {
        self.algorithm
    }

    /// Number of live window states.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the raw state for `user_id`, if any.
    pub fn state(&self, user_id: &str) -> Option<WindowState> {
        self.entries.get(user_id).map(|entry| *entry.value())
    }

    /// Drop states nobody has touched for `idle_for` whose counts no longer
    /// affect any decision. Returns how many were removed.
    ///
    /// A state inside an open window is kept however long it sat idle, so a
    /// user who exhausted a daily quota cannot get a new budget by waiting out
    /// the idle TTL.
    pub fn evict_idle(&self, now_millis: u64, idle_for: Duration) -> usize {
        let idle_millis = u64::try_from(idle_for.as_millis()).unwrap_or(u64::MAX);
        let spans = match self.algorithm {
            WindowAlgorithm::FixedWindow => 1,
            WindowAlgorithm::SlidingWindowCounter => 2,
        };
        let before = self.entries.len();
        self.entries.retain(|_, state| !state.is_expired(now_millis, idle_millis, spans));
        before.saturating_sub(self.entries.len())
    }

    fn admit_in_place(&self, state: &mut WindowState, budget: &Budget, now: u64) -> Admission {
        if state.revision > budget.revision {
            return Admission::Stale;
        }
        if state.revision < budget.revision {
            *state = WindowState::fresh(budget, now);
        }
        strategies::admit(self.algorithm, state, budget, now)
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    type Error = Infallible;

    async fn try_admit(&self, user_id: &str, budget: Budget, now_millis: u64) -> Result<Admission, Self::Error> {
        // Fast path avoids allocating the key for users that already have a window.
        if let Some(mut entry) = self.entries.get_mut(user_id) {
            return Ok(self.admit_in_place(entry.value_mut(), &budget, now_millis));
        }
        let mut entry = self
            .entries
            .entry(user_id.to_string())
            .or_insert_with(|| WindowState::fresh(&budget, now_millis));
        Ok(self.admit_in_place(entry.value_mut(), &budget, now_millis))
    }

    async fn peek(&self, user_id: &str, budget: Budget, now_millis: u64) -> Result<WindowSnapshot, Self::Error> {
        let state = match self.entries.get(user_id) {
            Some(entry) if entry.revision == budget.revision => *entry.value(),
            _ => return Ok(WindowSnapshot { remaining: budget.limit, reset_after: Duration::ZERO }),
        };
        Ok(strategies::snapshot(self.algorithm, &state, &budget, now_millis))
    }

    async fn reset(&self, user_id: &str) -> Result<bool, Self::Error> {
        let existed = self.entries.remove(user_id).is_some();
        debug!(target: "quotagate::rate_limit", user_id, existed, "window reset");
        Ok(existed)
    }
}

/// Periodically evict idle window states, reporting each non-empty sweep to `sink`.
///
/// The returned handle can be aborted on shutdown.
pub fn spawn_evictor(
    store: InMemoryWindowStore,
    clock: Arc<dyn Clock>,
    sink: SharedSink,
    every: Duration,
    idle_for: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately; skip it so a fresh store isn't swept at boot.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = store.evict_idle(clock.now_millis(), idle_for);
            if evicted > 0 {
                info!(target: "quotagate::rate_limit", evicted, live = store.len(), "evicted idle windows");
                sink.emit(QuotaEvent::Evicted { entries: evicted }).await;
            }
        }
    })
}
