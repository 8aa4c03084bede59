//! Error types for quota configuration and accounting
use thiserror::Error;

/// Unified error type for the quota store, the accounting table and the engine.
///
/// Quota and unknown-user rejections are *not* errors: they are ordinary
/// [`Decision`](crate::decision::Decision) outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    /// Malformed quota, rejected before anything is stored.
    #[error("invalid quota config: {reason}")]
    InvalidConfig { reason: String },
    /// No configuration exists for the user.
    #[error("rate-limit config for '{user_id}' not found")]
    NotFound { user_id: String },
    /// Accounting or configuration state could not be consulted.
    #[error("quota storage unavailable: {0}")]
    Storage(String),
}

impl QuotaError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfig { reason: reason.into() }
    }

    pub(crate) fn not_found(user_id: &str) -> Self {
        Self::NotFound { user_id: user_id.to_string() }
    }

    /// Check if this error is a validation failure.
    pub fn is_invalid_config(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }

    /// Check if this error means the user has no configuration.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is an internal storage fault.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
