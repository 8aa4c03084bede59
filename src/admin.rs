//! Configuration API: administrative create/update/delete of user quotas.
//!
//! A PUT only writes the quota store. The new record carries a fresh revision,
//! and the window table reinitialises any state counted under an older one on
//! the next admit, so a new quota never inherits counts from the old one and
//! no request admitted under the new revision is ever discarded. A DELETE also
//! drops the window state, since a deleted user is unknown. Results are
//! transport agnostic; [`crate::server`] maps them onto HTTP statuses.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::decision::{Decision, DecisionEngine, QuotaStatus};
use crate::error::QuotaError;
use crate::quota::{self, InMemoryQuotaStore, LimitPer, QuotaStore};
use crate::rate_limit::{InMemoryWindowStore, WindowStore};
use crate::telemetry::QuotaEvent;

/// Body of a quota PUT.
///
/// Fields are kept loose (signed integer, free-form unit) so validation errors
/// come back as `InvalidConfig` instead of a generic decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRequest {
    pub quota_limit: i64,
    pub limit_per: String,
}

impl QuotaRequest {
    pub fn new(quota_limit: i64, limit_per: LimitPer) -> Self {
        Self { quota_limit, limit_per: limit_per.as_str().to_string() }
    }
}

/// Confirmed configuration plus current remaining quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaBody {
    /// Accounting key, i.e. the user id.
    pub bucket_name: String,
    pub quota_limit: u32,
    pub limit_per: LimitPer,
    pub quota_remaining: u32,
}

impl From<QuotaStatus> for QuotaBody {
    fn from(status: QuotaStatus) -> Self {
        Self {
            bucket_name: status.quota.user_id.clone(),
            quota_limit: status.quota.quota_limit,
            limit_per: status.quota.limit_per,
            quota_remaining: status.remaining,
        }
    }
}

/// Whether a PUT created a new configuration or replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

/// Result of consuming one unit through the management surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrement {
    pub admitted: bool,
    pub body: QuotaBody,
}

/// Administrative operations over a decision engine's stores.
pub struct ConfigApi<Q = InMemoryQuotaStore, W = InMemoryWindowStore> {
    engine: DecisionEngine<Q, W>,
}

impl<Q, W> Clone for ConfigApi<Q, W> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone() }
    }
}

impl<Q, W> ConfigApi<Q, W>
where
    Q: QuotaStore + 'static,
    W: WindowStore + 'static,
{
    pub fn new(engine: DecisionEngine<Q, W>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &DecisionEngine<Q, W> {
        &self.engine
    }

    /// Create or replace the quota for `user_id`. Its next request opens a new window.
    pub async fn put(&self, user_id: &str, request: &QuotaRequest) -> Result<(QuotaBody, Upsert), QuotaError> {
        let (limit, per) = quota::validate(user_id, request.quota_limit, &request.limit_per)?;
        let (stored, replaced) = self.engine.quotas().set(user_id, limit, per)?;

        let upsert = if replaced { Upsert::Updated } else { Upsert::Created };
        info!(target: "quotagate::admin", user_id, quota_limit = limit, limit_per = %per, ?upsert, "quota configured");
        self.engine
            .sink()
            .emit(QuotaEvent::ConfigUpdated {
                user_id: user_id.to_string(),
                quota_limit: limit,
                limit_per: per,
                created: !replaced,
            })
            .await;

        let body = QuotaBody {
            bucket_name: stored.user_id.clone(),
            quota_limit: stored.quota_limit,
            limit_per: stored.limit_per,
            quota_remaining: stored.quota_limit,
        };
        Ok((body, upsert))
    }

    /// Current configuration and remaining quota for `user_id`.
    pub async fn get(&self, user_id: &str) -> Result<QuotaBody, QuotaError> {
        self.engine.status(user_id).await.map(QuotaBody::from)
    }

    /// Remove the quota for `user_id`; its next request is an unknown-user rejection.
    pub async fn delete(&self, user_id: &str) -> Result<(), QuotaError> {
        self.engine.quotas().delete(user_id)?;
        self.reset_window(user_id).await?;
        info!(target: "quotagate::admin", user_id, "quota deleted");
        self.engine.sink().emit(QuotaEvent::ConfigDeleted { user_id: user_id.to_string() }).await;
        Ok(())
    }

    /// Remaining quota for every configured user.
    pub async fn status_all(&self) -> Result<Vec<QuotaBody>, QuotaError> {
        let statuses = self.engine.status_all().await?;
        Ok(statuses.into_iter().map(QuotaBody::from).collect())
    }

    /// Consume one unit for `user_id`, as an edge proxy's sub-request would.
    pub async fn decrement(&self, user_id: &str) -> Result<Decrement, QuotaError> {
        let (admitted, quota_limit, limit_per, quota_remaining) = match self.engine.decide(user_id).await? {
            Decision::RejectUnknownUser => return Err(QuotaError::NotFound { user_id: user_id.to_string() }),
            Decision::Allow { limit, limit_per, remaining, .. } => (true, limit, limit_per, remaining),
            Decision::RejectQuota { limit, limit_per, .. } => (false, limit, limit_per, 0),
        };
        Ok(Decrement {
            admitted,
            body: QuotaBody { bucket_name: user_id.to_string(), quota_limit, limit_per, quota_remaining },
        })
    }

    async fn reset_window(&self, user_id: &str) -> Result<(), QuotaError> {
        self.engine
            .windows()
            .reset(user_id)
            .await
            .map(|_| ())
            .map_err(|e| QuotaError::Storage(e.to_string()))
    }
}
