#![allow(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quotagate::{ConfigApi, Decision, DecisionEngine, LimitPer, ManualClock, QuotaRequest, QuotaStore, WindowAlgorithm};

async fn race(engine: DecisionEngine, user_id: &'static str, tasks: usize) -> (usize, usize) {
    let allowed = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(tokio::sync::Barrier::new(tasks));

    let mut handles = Vec::with_capacity(tasks);
    for _ in 0..tasks {
        let engine = engine.clone();
        let allowed = allowed.clone();
        let rejected = rejected.clone();
        let start = start.clone();
        handles.push(tokio::spawn(async move {
            start.wait().await;
            match engine.decide(user_id).await.expect("in-memory stores never fault") {
                Decision::Allow { .. } => allowed.fetch_add(1, Ordering::SeqCst),
                _ => rejected.fetch_add(1, Ordering::SeqCst),
            };
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    (allowed.load(Ordering::SeqCst), rejected.load(Ordering::SeqCst))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_requests_never_exceed_quota() {
    for algorithm in [WindowAlgorithm::FixedWindow, WindowAlgorithm::SlidingWindowCounter] {
        let engine = DecisionEngine::in_memory_with(algorithm).with_clock(ManualClock::starting_at(1_000));
        engine.quotas().set("user-02", 50, LimitPer::Minute).unwrap();

        let (allowed, rejected) = race(engine, "user-02", 200).await;
        assert_eq!(allowed, 50, "{algorithm:?}");
        assert_eq!(rejected, 150, "{algorithm:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn exactly_quota_many_tasks_all_succeed() {
    let engine = DecisionEngine::in_memory().with_clock(ManualClock::starting_at(1_000));
    engine.quotas().set("u", 64, LimitPer::Second).unwrap();
    let (allowed, rejected) = race(engine, "u", 64).await;
    assert_eq!((allowed, rejected), (64, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn busy_user_does_not_starve_others() {
    let engine = DecisionEngine::in_memory().with_clock(ManualClock::starting_at(1_000));
    engine.quotas().set("noisy", 10, LimitPer::Second).unwrap();
    engine.quotas().set("quiet", 10, LimitPer::Second).unwrap();

    let noisy = tokio::spawn(race(engine.clone(), "noisy", 100));
    let quiet = tokio::spawn(race(engine.clone(), "quiet", 10));
    assert_eq!(noisy.await.unwrap().0, 10);
    assert_eq!(quiet.await.unwrap(), (10, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconfiguration_during_traffic_never_overadmits() {
    let engine = DecisionEngine::in_memory().with_clock(ManualClock::starting_at(1_000));
    engine.quotas().set("u", 5, LimitPer::Hour).unwrap();

    let traffic = tokio::spawn(race(engine.clone(), "u", 100));
    engine.quotas().set("u", 5, LimitPer::Hour).unwrap();
    let (allowed, _) = traffic.await.unwrap();
    // At most one full budget under each revision.
    assert!(allowed <= 10, "allowed {allowed}");
    assert!(allowed >= 5, "allowed {allowed}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn config_api_puts_during_traffic_never_overadmit() {
    const PUTS: usize = 20;
    let api = ConfigApi::new(DecisionEngine::in_memory().with_clock(ManualClock::starting_at(1_000)));
    api.put("u", &QuotaRequest::new(1, LimitPer::Hour)).await.unwrap();

    let traffic = tokio::spawn(race(api.engine().clone(), "u", 200));
    let admin = {
        let api = api.clone();
        tokio::spawn(async move {
            for _ in 0..PUTS {
                api.put("u", &QuotaRequest::new(1, LimitPer::Hour)).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    admin.await.unwrap();
    let (allowed, _) = traffic.await.unwrap();
    // One admit per revision at most: the first quota plus each replacement.
    assert!(allowed <= PUTS + 1, "allowed {allowed}");
    assert!(allowed >= 1, "allowed {allowed}");
}
