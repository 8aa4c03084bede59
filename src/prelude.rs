//! Convenient re-exports for common quotagate types.
pub use crate::{
    admin::{ConfigApi, QuotaBody, QuotaRequest, Upsert},
    clock::{Clock, ManualClock, MonotonicClock},
    decision::{Decision, DecisionEngine, MAX_STALE_RETRIES},
    error::QuotaError,
    quota::{InMemoryQuotaStore, LimitPer, QuotaStore},
    rate_limit::{InMemoryWindowStore, QuotaLayer, WindowAlgorithm, WindowStore},
    telemetry::{LogSink, MemorySink, QuotaEvent, TelemetrySink},
};
