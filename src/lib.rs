#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # quotagate
//!
//! Per-user request quotas for an HTTP gateway.
//!
//! ## Features
//!
//! - **Quota store** mapping a user id to `quota_limit` requests per second,
//!   minute, hour, day or month
//! - **Window accounting** that is atomic per user and isolated between users,
//!   with fixed-window and sliding-window-counter algorithms
//! - **Decision engine** answering allow, reject-quota or reject-unknown-user,
//!   failing closed on storage faults
//! - **Configuration API** to create, update, inspect and delete quotas
//! - **Tower middleware** and an **axum router** exposing all of the above
//!
//! ## Quick Start
//!
//! ```rust
//! use quotagate::{Decision, DecisionEngine, LimitPer, QuotaStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), quotagate::QuotaError> {
//!     let engine = DecisionEngine::in_memory();
//!     engine.quotas().set("user-02", 3, LimitPer::Second)?;
//!
//!     let mut outcomes = Vec::new();
//!     for _ in 0..5 {
//!         outcomes.push(engine.decide("user-02").await?.is_allowed());
//!     }
//!     assert_eq!(outcomes, [true, true, true, false, false]);
//!     assert_eq!(engine.decide("attacker").await?, Decision::RejectUnknownUser);
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod identity;
pub mod prelude;
pub mod quota;
pub mod rate_limit;
pub mod server;
pub mod telemetry;

// Re-exports
pub use admin::{ConfigApi, QuotaBody, QuotaRequest, Upsert};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, GatewayConfig};
pub use decision::{Decision, DecisionEngine, QuotaStatus};
pub use error::QuotaError;
pub use identity::{IdentityExtractor, UserId};
pub use quota::{InMemoryQuotaStore, LimitPer, QuotaStore, UserQuota};
pub use rate_limit::{InMemoryWindowStore, QuotaLayer, WindowAlgorithm, WindowStore};
