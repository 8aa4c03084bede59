use crate::rate_limit::{Admission, Budget, WindowAlgorithm, WindowSnapshot, WindowState};
use std::time::Duration;

/// Count one request against `state` under `algorithm`.
///
/// Callers hold exclusive access to `state` for the duration of the call; the
/// read-modify-write below is only atomic because of that.
pub fn admit(algorithm: WindowAlgorithm, state: &mut WindowState, budget: &Budget, now: u64) -> Admission {
    state.last_seen = state.last_seen.max(now);
    match algorithm {
        WindowAlgorithm::FixedWindow => FixedWindow::admit(state, budget, now),
        WindowAlgorithm::SlidingWindowCounter => SlidingWindowCounter::admit(state, budget, now),
    }
}

/// What `admit` would see right now, without counting anything.
pub fn snapshot(algorithm: WindowAlgorithm, state: &WindowState, budget: &Budget, now: u64) -> WindowSnapshot {
    let mut view = *state;
    match algorithm {
        WindowAlgorithm::FixedWindow => {
            FixedWindow::roll(&mut view, budget, now);
            WindowSnapshot {
                remaining: budget.limit.saturating_sub(view.count),
                reset_after: window_left(&view, budget, now),
            }
        }
        WindowAlgorithm::SlidingWindowCounter => {
            SlidingWindowCounter::roll(&mut view, budget, now);
            WindowSnapshot {
                remaining: SlidingWindowCounter::remaining(&view, budget, now),
                reset_after: window_left(&view, budget, now),
            }
        }
    }
}

fn window_len(budget: &Budget) -> u64 {
    // A zero-length window would roll over on every request and never deny.
    budget.window_millis.max(1)
}

fn window_left(state: &WindowState, budget: &Budget, now: u64) -> Duration {
    let end = state.window_start.saturating_add(window_len(budget));
    Duration::from_millis(end.saturating_sub(now))
}

/// Fixed-window counter: one count and one start timestamp per user.
///
/// A client can get up to `2 * limit - 1` requests through across a window edge;
/// that burst is the price of O(1) state.
pub struct FixedWindow;

impl FixedWindow {
    fn roll(state: &mut WindowState, budget: &Budget, now: u64) {
        let window = window_len(budget);
        let elapsed = now.saturating_sub(state.window_start);
        if elapsed >= window {
            state.previous_count = if elapsed < window.saturating_mul(2) { state.count } else { 0 };
            state.count = 0;
            state.window_start = now;
        }
    }

    fn admit(state: &mut WindowState, budget: &Budget, now: u64) -> Admission {
        Self::roll(state, budget, now);
        let reset_after = window_left(state, budget, now);
        if state.count < budget.limit {
            state.count += 1;
            Admission::Allowed { remaining: budget.limit - state.count, reset_after }
        } else {
            Admission::Denied { retry_after: reset_after.max(Duration::from_millis(1)) }
        }
    }
}

/// Sliding-window counter: estimates the rolling count as
/// `previous * (window - elapsed) / window + current`.
///
/// Windows stay aligned to multiples of the window length so the weighting
/// reflects real overlap.
pub struct SlidingWindowCounter;

impl SlidingWindowCounter {
    fn roll(state: &mut WindowState, budget: &Budget, now: u64) {
        let window = window_len(budget);
        let elapsed = now.saturating_sub(state.window_start);
        if elapsed >= window {
            let windows = elapsed / window;
            state.previous_count = if windows == 1 { state.count } else { 0 };
            state.count = 0;
            state.window_start = state.window_start.saturating_add(windows.saturating_mul(window));
        }
    }

    /// Estimated count scaled by the window length, to stay in integers.
    fn weighted(state: &WindowState, budget: &Budget, now: u64) -> u128 {
        let window = u128::from(window_len(budget));
        let elapsed = u128::from(now.saturating_sub(state.window_start)).min(window);
        u128::from(state.previous_count) * (window - elapsed) + u128::from(state.count) * window
    }

    fn remaining(state: &WindowState, budget: &Budget, now: u64) -> u32 {
        let window = u128::from(window_len(budget));
        let used = Self::weighted(state, budget, now).div_ceil(window);
        u32::try_from(u128::from(budget.limit).saturating_sub(used)).unwrap_or(0)
    }

    fn admit(state: &mut WindowState, budget: &Budget, now: u64) -> Admission {
        Self::roll(state, budget, now);
        let window = window_len(budget);
        let capacity = u128::from(budget.limit) * u128::from(window);
        if Self::weighted(state, budget, now) < capacity {
            state.count += 1;
            return Admission::Allowed {
                remaining: Self::remaining(state, budget, now),
                reset_after: window_left(state, budget, now),
            };
        }

        let retry_after = if state.count >= budget.limit || state.previous_count == 0 {
            window_left(state, budget, now)
        } else {
            // Solve previous * (window - t) < (limit - count) * window for the
            // first elapsed time t at which one more request fits.
            let headroom = u128::from(budget.limit - state.count) * u128::from(window);
            let shrink = headroom / u128::from(state.previous_count);
            let target = u128::from(window).saturating_sub(shrink) + 1;
            let elapsed = u128::from(now.saturating_sub(state.window_start));
            Duration::from_millis(u64::try_from(target.saturating_sub(elapsed)).unwrap_or(u64::MAX))
        };
        Admission::Denied { retry_after: retry_after.max(Duration::from_millis(1)) }
    }
}
