#![allow(missing_docs)]

mod common;

use std::time::Duration;

use common::test_helpers::{configure, engine_at, SharedWriter};
use quotagate::quota::InMemoryQuotaStore;
use quotagate::rate_limit::{Admission, Budget, WindowSnapshot, WindowStore};
use quotagate::telemetry::QuotaEvent;
use quotagate::{Decision, DecisionEngine, LimitPer, QuotaStore, WindowAlgorithm};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[tokio::test]
async fn three_per_second_admits_three_of_five() {
    let (engine, _clock, _sink) = engine_at(50_000);
    configure(&engine, "user-02", 3, LimitPer::Second);

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(engine.decide("user-02").await.unwrap());
    }
    let allowed: Vec<bool> = outcomes.iter().map(Decision::is_allowed).collect();
    assert_eq!(allowed, [true, true, true, false, false]);
    assert_eq!(outcomes[2].remaining(), Some(0));
    assert!(matches!(outcomes[3], Decision::RejectQuota { limit: 3, .. }));
}

#[tokio::test]
async fn next_window_admits_again() {
    let (engine, clock, _sink) = engine_at(0);
    configure(&engine, "u", 2, LimitPer::Second);
    assert!(engine.decide("u").await.unwrap().is_allowed());
    assert!(engine.decide("u").await.unwrap().is_allowed());

    clock.advance(400);
    match engine.decide("u").await.unwrap() {
        Decision::RejectQuota { retry_after, .. } => assert_eq!(retry_after, Duration::from_millis(600)),
        other => panic!("expected quota rejection, got {other:?}"),
    }

    clock.advance(600);
    assert!(engine.decide("u").await.unwrap().is_allowed());
}

#[tokio::test]
async fn unknown_user_is_rejected_every_time() {
    let (engine, _clock, sink) = engine_at(0);
    configure(&engine, "user-02", 3, LimitPer::Second);
    for _ in 0..5 {
        assert_eq!(engine.decide("attacker").await.unwrap(), Decision::RejectUnknownUser);
    }
    assert_eq!(sink.of_kind("unknown_user").len(), 5);
    // Other users' accounting is untouched.
    assert_eq!(engine.status("user-02").await.unwrap().remaining, 3);
}

#[tokio::test]
async fn deleted_user_becomes_unknown() {
    let (engine, _clock, _sink) = engine_at(0);
    configure(&engine, "u", 5, LimitPer::Minute);
    assert!(engine.decide("u").await.unwrap().is_allowed());
    engine.quotas().delete("u").unwrap();
    assert_eq!(engine.decide("u").await.unwrap(), Decision::RejectUnknownUser);
}

#[tokio::test]
async fn reconfiguring_starts_a_fresh_window() {
    let (engine, _clock, _sink) = engine_at(0);
    configure(&engine, "u", 1, LimitPer::Hour);
    assert!(engine.decide("u").await.unwrap().is_allowed());
    assert!(!engine.decide("u").await.unwrap().is_allowed());

    // Same limit, new revision: no carry-over from the exhausted window.
    configure(&engine, "u", 1, LimitPer::Hour);
    assert!(engine.decide("u").await.unwrap().is_allowed());
}

#[tokio::test]
async fn users_do_not_share_windows() {
    let (engine, _clock, _sink) = engine_at(0);
    configure(&engine, "a", 1, LimitPer::Second);
    configure(&engine, "b", 1, LimitPer::Second);
    assert!(engine.decide("a").await.unwrap().is_allowed());
    assert!(!engine.decide("a").await.unwrap().is_allowed());
    assert!(engine.decide("b").await.unwrap().is_allowed());
}

#[tokio::test]
async fn sliding_counter_smooths_the_boundary_burst() {
    let clock = quotagate::ManualClock::starting_at(0);
    let engine = DecisionEngine::in_memory_with(WindowAlgorithm::SlidingWindowCounter).with_clock(clock.clone());
    engine.quotas().set("u", 4, LimitPer::Second).unwrap();

    clock.set(900);
    for _ in 0..4 {
        assert!(engine.decide("u").await.unwrap().is_allowed());
    }
    // 50ms into the next window 95% of the previous count still applies:
    // a fixed window would admit four more here, the sliding counter only one.
    clock.set(1_950);
    assert!(engine.decide("u").await.unwrap().is_allowed());
    assert!(!engine.decide("u").await.unwrap().is_allowed());
}

#[tokio::test]
async fn decisions_emit_matching_events() {
    let (engine, _clock, sink) = engine_at(0);
    configure(&engine, "u", 1, LimitPer::Second);
    engine.decide("u").await.unwrap();
    engine.decide("u").await.unwrap();
    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], QuotaEvent::Admitted { user_id, remaining: 0 } if user_id == "u"));
    assert!(matches!(&events[1], QuotaEvent::Throttled { limit: 1, .. }));
}

#[derive(Debug, thiserror::Error)]
#[error("connection refused")]
struct Refused;

struct UnreachableWindows;

#[async_trait::async_trait]
impl WindowStore for UnreachableWindows {
    type Error = Refused;

    async fn try_admit(&self, _: &str, _: Budget, _: u64) -> Result<Admission, Refused> {
        Err(Refused)
    }

    async fn peek(&self, _: &str, _: Budget, _: u64) -> Result<WindowSnapshot, Refused> {
        Err(Refused)
    }

    async fn reset(&self, _: &str) -> Result<bool, Refused> {
        Err(Refused)
    }
}

#[tokio::test]
async fn storage_fault_fails_closed_and_warns() {
    let writer = SharedWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(writer.clone()))
        .with_target(true)
        .without_time()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let quotas = InMemoryQuotaStore::new();
    quotas.set("u", 10, LimitPer::Second).unwrap();
    let sink = quotagate::telemetry::MemorySink::new();
    let engine = DecisionEngine::new(quotas, UnreachableWindows).with_sink(sink.clone());

    let err = engine.decide("u").await.unwrap_err();
    assert!(err.is_storage());
    assert_eq!(sink.of_kind("store_fault").len(), 1);

    let logs = writer.contents();
    assert!(logs.contains("decision failed closed"), "fault should be logged: {logs}");
    assert!(logs.contains("connection refused"));
}

#[tokio::test]
async fn idle_eviction_does_not_refill_a_daily_quota() {
    let (engine, clock, _sink) = engine_at(1_000);
    configure(&engine, "user-02", 1, LimitPer::Day);
    assert!(engine.decide("user-02").await.unwrap().is_allowed());

    clock.advance(2 * 3_600_000);
    assert_eq!(engine.windows().evict_idle(1_000 + 2 * 3_600_000, Duration::from_secs(3600)), 0);
    assert!(matches!(engine.decide("user-02").await.unwrap(), Decision::RejectQuota { .. }));
}
