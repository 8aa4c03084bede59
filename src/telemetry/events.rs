use std::fmt;
use std::time::Duration;

use crate::quota::LimitPer;

/// Events emitted by the decision engine and the configuration API.
///
/// Every decision produces exactly one of `Admitted`, `Throttled`,
/// `UnknownUser` or `StoreFault`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaEvent {
    /// A request was counted against the user's window.
    Admitted {
        user_id: String,
        /// Permits left in the window after this request.
        remaining: u32,
    },
    /// The user's quota for the current window is exhausted.
    Throttled {
        user_id: String,
        limit: u32,
        retry_after: Duration,
    },
    /// No quota configuration exists for the identity.
    UnknownUser { user_id: String },
    /// Accounting state could not be consulted; the request was rejected.
    StoreFault { user_id: String, reason: String },
    /// A quota was created or replaced.
    ConfigUpdated {
        user_id: String,
        quota_limit: u32,
        limit_per: LimitPer,
        created: bool,
    },
    /// A quota was removed.
    ConfigDeleted { user_id: String },
    /// Idle window states were swept.
    Evicted { entries: usize },
}

impl QuotaEvent {
    /// Short machine-friendly label, stable across versions.
    pub fn kind(&self) -> &'static str {
        match self {
            QuotaEvent::Admitted { .. } => "admitted",
            QuotaEvent::Throttled { .. } => "throttled",
            QuotaEvent::UnknownUser { .. } => "unknown_user",
            QuotaEvent::StoreFault { .. } => "store_fault",
            QuotaEvent::ConfigUpdated { .. } => "config_updated",
            QuotaEvent::ConfigDeleted { .. } => "config_deleted",
            QuotaEvent::Evicted { .. } => "evicted",
        }
    }
}

impl fmt::Display for QuotaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaEvent::Admitted { user_id, remaining } => {
                write!(f, "Admitted({}, remaining={})", user_id, remaining)
            }
            QuotaEvent::Throttled { user_id, limit, retry_after } => {
                write!(f, "Throttled({}, limit={}, retry_after={:?})", user_id, limit, retry_after)
            }
            QuotaEvent::UnknownUser { user_id } => write!(f, "UnknownUser({})", user_id),
            QuotaEvent::StoreFault { user_id, reason } => {
                write!(f, "StoreFault({}, {})", user_id, reason)
            }
            QuotaEvent::ConfigUpdated { user_id, quota_limit, limit_per, created } => {
                let verb = if *created { "created" } else { "updated" };
                write!(f, "ConfigUpdated({}, {} {}, {})", user_id, quota_limit, limit_per, verb)
            }
            QuotaEvent::ConfigDeleted { user_id } => write!(f, "ConfigDeleted({})", user_id),
            QuotaEvent::Evicted { entries } => write!(f, "Evicted({})", entries),
        }
    }
}
