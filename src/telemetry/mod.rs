//! Telemetry and observability for quota decisions.
//!
//! The decision engine and the configuration API emit structured
//! [`QuotaEvent`]s. Events flow through `TelemetrySink` implementations which
//! can log, collect, or forward them.
//!
//! # Telemetry Sinks
//!
//! The `TelemetrySink` trait defines how events are consumed. It's implemented
//! as a `tower::Service<QuotaEvent>` for composability; [`SharedSink`] erases
//! the concrete sink type for storage in shared state.

pub mod events;
pub mod sinks;

pub use events::QuotaEvent;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, SharedSink, TelemetrySink};
