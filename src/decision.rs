//! The rate-decision engine.
//!
//! [`DecisionEngine::decide`] resolves a user id to its quota, counts the
//! request against the user's window and returns a [`Decision`]:
//!
//! - no quota configured (never, or deleted) -> [`Decision::RejectUnknownUser`]
//! - within quota -> [`Decision::Allow`]
//! - over quota -> [`Decision::RejectQuota`]
//!
//! Storage faults are returned as `Err(QuotaError::Storage)`. Callers must
//! treat them as a rejection; the engine never turns a fault into an allow.
//!
//! # Example
//!
//! ```rust
//! use quotagate::decision::{Decision, DecisionEngine};
//! use quotagate::quota::{LimitPer, QuotaStore};
//! use quotagate::clock::ManualClock;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), quotagate::QuotaError> {
//! let engine = DecisionEngine::in_memory().with_clock(ManualClock::new());
//! engine.quotas().set("user-02", 1, LimitPer::Second)?;
//!
//! assert!(engine.decide("user-02").await?.is_allowed());
//! assert!(matches!(engine.decide("user-02").await?, Decision::RejectQuota { .. }));
//! assert_eq!(engine.decide("attacker").await?, Decision::RejectUnknownUser);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::error::QuotaError;
use crate::quota::{InMemoryQuotaStore, LimitPer, QuotaStore, UserQuota};
use crate::rate_limit::{Admission, Budget, InMemoryWindowStore, WindowAlgorithm, WindowSnapshot, WindowStore};
use crate::telemetry::{QuotaEvent, SharedSink, TelemetrySink};

/// How many times a decision re-reads the quota after losing a race with a
/// configuration change before failing closed.
pub const MAX_STALE_RETRIES: usize = 3;

/// Outcome of a rate decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Forward the request.
    Allow {
        /// Configured quota for the window.
        limit: u32,
        /// Window unit the quota was counted over.
        limit_per: LimitPer,
        /// Permits left in this window.
        remaining: u32,
        /// Time until the window rolls over.
        reset_after: Duration,
    },
    /// Quota exhausted; retry after the window rolls over.
    RejectQuota {
        limit: u32,
        limit_per: LimitPer,
        /// How long the caller should wait before retrying.
        retry_after: Duration,
    },
    /// No configuration exists for this identity.
    RejectUnknownUser,
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    /// Configured limit, when the user is known.
    pub fn limit(&self) -> Option<u32> {
        match self {
            Decision::Allow { limit, .. } | Decision::RejectQuota { limit, .. } => Some(*limit),
            Decision::RejectUnknownUser => None,
        }
    }

    /// Remaining permits, when the user is known.
    pub fn remaining(&self) -> Option<u32> {
        match self {
            Decision::Allow { remaining, .. } => Some(*remaining),
            Decision::RejectQuota { .. } => Some(0),
            Decision::RejectUnknownUser => None,
        }
    }
}

/// Current accounting for one configured user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaStatus {
    pub quota: Arc<UserQuota>,
    pub remaining: u32,
    pub reset_after: Duration,
}

/// Decision engine over a quota store and a window store.
///
/// Clones share the same stores, clock and sink, so one engine can be handed
/// to every request handler.
pub struct DecisionEngine<Q = InMemoryQuotaStore, W = InMemoryWindowStore> {
    quotas: Arc<Q>,
    windows: Arc<W>,
    clock: Arc<dyn Clock>,
    sink: SharedSink,
}

impl<Q, W> Clone for DecisionEngine<Q, W> {
    fn clone(&self) -> Self {
        Self {
            quotas: self.quotas.clone(),
            windows: self.windows.clone(),
            clock: self.clock.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<Q, W> std::fmt::Debug for DecisionEngine<Q, W>
where
    Q: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("quotas", &self.quotas)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl DecisionEngine {
    /// Engine over fresh in-memory stores using the fixed-window algorithm.
    pub fn in_memory() -> Self {
        Self::new(InMemoryQuotaStore::new(), InMemoryWindowStore::new())
    }

    /// Engine over fresh in-memory stores using `algorithm`.
    pub fn in_memory_with(algorithm: WindowAlgorithm) -> Self {
        Self::new(InMemoryQuotaStore::new(), InMemoryWindowStore::with_algorithm(algorithm))
    }
}

impl<Q, W> DecisionEngine<Q, W>
where
    Q: QuotaStore + 'static,
    W: WindowStore + 'static,
{
    pub fn new(quotas: Q, windows: W) -> Self {
        Self {
            quotas: Arc::new(quotas),
            windows: Arc::new(windows),
            clock: Arc::new(MonotonicClock::default()),
            sink: SharedSink::default(),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Attach a telemetry sink.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink + Sync,
        S::Future: Send + 'static,
    {
        self.sink = SharedSink::new(sink);
        self
    }

    pub fn quotas(&self) -> &Q {
        &self.quotas
    }

    pub fn windows(&self) -> &W {
        &self.windows
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    /// Decide for `user_id` at the engine clock's current time.
    pub async fn decide(&self, user_id: &str) -> Result<Decision, QuotaError> {
        self.decide_at(user_id, self.clock.now_millis()).await
    }

    /// Decide for `user_id` at `now_millis`.
    pub async fn decide_at(&self, user_id: &str, now_millis: u64) -> Result<Decision, QuotaError> {
        for attempt in 0..MAX_STALE_RETRIES {
            let quota = match self.quotas.get(user_id) {
                Ok(quota) => quota,
                Err(QuotaError::NotFound { .. }) => {
                    debug!(target: "quotagate::decision", user_id, "unknown user rejected");
                    self.sink.emit(QuotaEvent::UnknownUser { user_id: user_id.to_string() }).await;
                    return Ok(Decision::RejectUnknownUser);
                }
                Err(err) => return Err(self.fault(user_id, err).await),
            };

            let admission = match self.windows.try_admit(user_id, Budget::from(&*quota), now_millis).await {
                Ok(admission) => admission,
                Err(err) => return Err(self.fault(user_id, QuotaError::Storage(err.to_string())).await),
            };

            match admission {
                Admission::Allowed { remaining, reset_after } => {
                    self.sink
                        .emit(QuotaEvent::Admitted { user_id: user_id.to_string(), remaining })
                        .await;
                    return Ok(Decision::Allow {
                        limit: quota.quota_limit,
                        limit_per: quota.limit_per,
                        remaining,
                        reset_after,
                    });
                }
                Admission::Denied { retry_after } => {
                    self.sink
                        .emit(QuotaEvent::Throttled {
                            user_id: user_id.to_string(),
                            limit: quota.quota_limit,
                            retry_after,
                        })
                        .await;
                    return Ok(Decision::RejectQuota {
                        limit: quota.quota_limit,
                        limit_per: quota.limit_per,
                        retry_after,
                    });
                }
                Admission::Stale => {
                    debug!(target: "quotagate::decision", user_id, attempt, "quota changed mid-decision; re-reading");
                }
            }
        }

        let err = QuotaError::Storage(format!(
            "quota for '{user_id}' kept changing across {MAX_STALE_RETRIES} attempts"
        ));
        Err(self.fault(user_id, err).await)
    }

    /// Read-only accounting for a configured user.
    pub async fn status(&self, user_id: &str) -> Result<QuotaStatus, QuotaError> {
        let quota = self.quotas.get(user_id)?;
        self.status_of(quota).await
    }

    /// Read-only accounting for every configured user, sorted by id.
    pub async fn status_all(&self) -> Result<Vec<QuotaStatus>, QuotaError> {
        let mut out = Vec::new();
        for quota in self.quotas.list()? {
            out.push(self.status_of(quota).await?);
        }
        Ok(out)
    }

    async fn status_of(&self, quota: Arc<UserQuota>) -> Result<QuotaStatus, QuotaError> {
        let WindowSnapshot { remaining, reset_after } = self
            .windows
            .peek(&quota.user_id, Budget::from(&*quota), self.clock.now_millis())
            .await
            .map_err(|e| QuotaError::Storage(e.to_string()))?;
        Ok(QuotaStatus { quota, remaining, reset_after })
    }

    async fn fault(&self, user_id: &str, err: QuotaError) -> QuotaError {
        warn!(target: "quotagate::decision", user_id, error = %err, "decision failed closed");
        self.sink
            .emit(QuotaEvent::StoreFault { user_id: user_id.to_string(), reason: err.to_string() })
            .await;
        err
    }
}
