//! Quota configuration: the closed window-unit vocabulary, the per-user record,
//! and the store that owns those records.
//!
//! The store is the single source of truth for "is this user known". Absence
//! of a record is what the decision engine turns into an unknown-user
//! rejection, whether the user was never configured or was deleted.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::QuotaError;

/// Window unit a quota is counted over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitPer {
    /// Requests per second.
    #[serde(rename = "rps")]
    Second,
    /// Requests per minute.
    #[serde(rename = "rpm")]
    Minute,
    /// Requests per hour.
    #[serde(rename = "rph")]
    Hour,
    /// Requests per day.
    #[serde(rename = "rpd")]
    Day,
    /// Requests per 30-day month.
    #[serde(rename = "rpM")]
    Month,
}

impl LimitPer {
    /// Length of one accounting window.
    pub const fn window(self) -> Duration {
        match self {
            LimitPer::Second => Duration::from_secs(1),
            LimitPer::Minute => Duration::from_secs(60),
            LimitPer::Hour => Duration::from_secs(3_600),
            LimitPer::Day => Duration::from_secs(86_400),
            LimitPer::Month => Duration::from_secs(2_592_000),
        }
    }

    /// Window length in milliseconds, the unit the accounting table works in.
    pub const fn window_millis(self) -> u64 {
        self.window().as_secs() * 1_000
    }

    /// Wire label (`rps`, `rpm`, ...).
    pub const fn as_str(self) -> &'static str {
        match self {
            LimitPer::Second => "rps",
            LimitPer::Minute => "rpm",
            LimitPer::Hour => "rph",
            LimitPer::Day => "rpd",
            LimitPer::Month => "rpM",
        }
    }
}

impl fmt::Display for LimitPer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitPer {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `rpM` and `rpm` differ only by case, so matching stays case-sensitive.
        match s {
            "rps" => Ok(LimitPer::Second),
            "rpm" => Ok(LimitPer::Minute),
            "rph" => Ok(LimitPer::Hour),
            "rpd" => Ok(LimitPer::Day),
            "rpM" => Ok(LimitPer::Month),
            other => Err(QuotaError::invalid(format!("unknown limit_per unit '{other}'"))),
        }
    }
}

/// A user's quota configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserQuota {
    pub user_id: String,
    pub quota_limit: u32,
    pub limit_per: LimitPer,
    /// Store-assigned stamp, strictly increasing across every `set`.
    pub revision: u64,
}

impl UserQuota {
    pub fn window(&self) -> Duration {
        self.limit_per.window()
    }

    pub fn window_millis(&self) -> u64 {
        self.limit_per.window_millis()
    }
}

/// Validate the raw parts of a quota before anything touches a store.
pub fn validate(user_id: &str, quota_limit: i64, limit_per: &str) -> Result<(u32, LimitPer), QuotaError> {
    if user_id.trim().is_empty() {
        return Err(QuotaError::invalid("user_id must not be empty"));
    }
    if quota_limit <= 0 {
        return Err(QuotaError::invalid(format!("quota_limit must be positive, got {quota_limit}")));
    }
    let limit = u32::try_from(quota_limit)
        .map_err(|_| QuotaError::invalid(format!("quota_limit {quota_limit} is too large")))?;
    let per = limit_per.parse::<LimitPer>()?;
    Ok((limit, per))
}

/// Storage interface for quota configuration.
///
/// Implementations must make `set` and `delete` atomic per user: a concurrent
/// `get` observes either the old record or the new one, never a mix.
pub trait QuotaStore: Send + Sync + fmt::Debug {
    /// Create or replace the quota for `user_id`. Returns the stored record and
    /// whether a previous record was replaced.
    fn set(&self, user_id: &str, quota_limit: u32, limit_per: LimitPer) -> Result<(Arc<UserQuota>, bool), QuotaError>;
    /// Fetch the quota for `user_id`.
    fn get(&self, user_id: &str) -> Result<Arc<UserQuota>, QuotaError>;
    /// Remove the quota for `user_id`, erroring if missing.
    fn delete(&self, user_id: &str) -> Result<Arc<UserQuota>, QuotaError>;
    /// Snapshot all quotas sorted by user id.
    fn list(&self) -> Result<Vec<Arc<UserQuota>>, QuotaError>;
}

/// In-memory implementation backed by an RwLock.
///
/// Writers are administrative and rare; readers on the hot path take the read
/// lock only long enough to clone an `Arc`.
#[derive(Default, Clone, Debug)]
pub struct InMemoryQuotaStore {
    entries: Arc<RwLock<HashMap<String, Arc<UserQuota>>>>,
    revisions: Arc<AtomicU64>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> QuotaError {
        QuotaError::Storage("quota store lock poisoned".into())
    }
}

impl QuotaStore for InMemoryQuotaStore {
    fn set(&self, user_id: &str, quota_limit: u32, limit_per: LimitPer) -> Result<(Arc<UserQuota>, bool), QuotaError> {
        if user_id.trim().is_empty() {
            return Err(QuotaError::invalid("user_id must not be empty"));
        }
        if quota_limit == 0 {
            return Err(QuotaError::invalid("quota_limit must be positive, got 0"));
        }
        let mut map = self.entries.write().map_err(|_| Self::poisoned())?;
        // Revision is drawn under the write lock so per-user revisions are ordered
        // the same way the writes are.
        let revision = self.revisions.fetch_add(1, Ordering::SeqCst) + 1;
        let quota = Arc::new(UserQuota {
            user_id: user_id.to_string(),
            quota_limit,
            limit_per,
            revision,
        });
        let replaced = map.insert(user_id.to_string(), quota.clone()).is_some();
        debug!(target: "quotagate::quota", user_id, quota_limit, %limit_per, revision, replaced, "quota stored");
        Ok((quota, replaced))
    }

    fn get(&self, user_id: &str) -> Result<Arc<UserQuota>, QuotaError> {
        let map = self.entries.read().map_err(|_| Self::poisoned())?;
        map.get(user_id).cloned().ok_or_else(|| QuotaError::not_found(user_id))
    }

    fn delete(&self, user_id: &str) -> Result<Arc<UserQuota>, QuotaError> {
        let mut map = self.entries.write().map_err(|_| Self::poisoned())?;
        map.remove(user_id).ok_or_else(|| QuotaError::not_found(user_id))
    }

    fn list(&self) -> Result<Vec<Arc<UserQuota>>, QuotaError> {
        let map = self.entries.read().map_err(|_| Self::poisoned())?;
        let mut quotas: Vec<Arc<UserQuota>> = map.values().cloned().collect();
        quotas.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(quotas)
    }
}
