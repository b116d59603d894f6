//! Integration tests for the sliding-window metrics engine
//!
//! Exercises the count-based and time-based windows through the public API
//! only, including the mutex/lock-free equivalence on deterministic
//! sequences and eviction behavior driven by a mock clock.

use std::time::Duration;

use faultline::metrics::{
    FixedCallWindow, LockFreeFixedCallWindow, LockFreeSlidingTimeWindow, Metrics, Outcome,
    SlidingTimeWindow, Snapshot,
};
use faultline::MockClock;

fn record_mixed_burst(metrics: &dyn Metrics) -> Snapshot {
    metrics.record(Duration::from_nanos(100), Outcome::Success);
    metrics.record(Duration::from_nanos(200), Outcome::Error);
    metrics.record(Duration::from_nanos(300), Outcome::SlowSuccess);
    metrics.record(Duration::from_nanos(400), Outcome::SlowError);
    metrics.record(Duration::from_nanos(500), Outcome::Success)
}

#[test]
fn count_window_aggregates_mixed_outcomes() {
    for window in [
        Box::new(FixedCallWindow::new(5).unwrap()) as Box<dyn Metrics>,
        Box::new(LockFreeFixedCallWindow::new(5).unwrap()) as Box<dyn Metrics>,
    ] {
        let snapshot = record_mixed_burst(window.as_ref());

        assert_eq!(snapshot.total_calls(), 5);
        assert_eq!(snapshot.failed_calls(), 2);
        assert_eq!(snapshot.successful_calls(), 3);
        assert_eq!(snapshot.slow_calls(), 2);
        assert_eq!(snapshot.slow_successful_calls(), 1);
        assert_eq!(snapshot.slow_failed_calls(), 1);
        assert_eq!(snapshot.total_duration(), Duration::from_nanos(1_500));
        assert_eq!(snapshot.average_duration(), Duration::from_nanos(300));
        assert_eq!(snapshot.failure_rate(), 40.0);
        assert_eq!(snapshot.slow_call_rate(), 40.0);
    }
}

#[test]
fn count_window_reflects_only_the_last_n_samples() {
    for window in [
        Box::new(FixedCallWindow::new(5).unwrap()) as Box<dyn Metrics>,
        Box::new(LockFreeFixedCallWindow::new(5).unwrap()) as Box<dyn Metrics>,
    ] {
        record_mixed_burst(window.as_ref());
        let snapshot = window.record(Duration::from_nanos(600), Outcome::Success);

        assert_eq!(snapshot.total_calls(), 5);
        assert_eq!(snapshot.failed_calls(), 1);
        assert_eq!(snapshot.slow_calls(), 2);
        assert_eq!(snapshot.slow_failed_calls(), 1);
        assert_eq!(snapshot.total_duration(), Duration::from_nanos(2_000));
        assert_eq!(snapshot.average_duration(), Duration::from_nanos(400));
        assert_eq!(snapshot.failure_rate(), 20.0);
    }
}

#[test]
fn count_window_retention_after_many_records() {
    let window = FixedCallWindow::new(8).unwrap();
    for i in 0..1_000u64 {
        window.record(Duration::from_nanos(i), Outcome::Success);
    }
    // The last eight samples are 992..=999.
    let snapshot = window.snapshot();
    assert_eq!(snapshot.total_calls(), 8);
    assert_eq!(snapshot.total_duration(), Duration::from_nanos((992..=999).sum()));
}

#[test]
fn time_window_ages_out_old_seconds() {
    let clock = MockClock::new();
    let window = SlidingTimeWindow::with_clock(2, clock.clone()).unwrap();

    window.record(Duration::from_nanos(100), Outcome::Error);
    clock.advance_secs(1);
    let snapshot = window.record(Duration::from_nanos(100), Outcome::Success);
    assert_eq!(snapshot.total_calls(), 2);
    assert_eq!(snapshot.failed_calls(), 1);

    clock.advance_secs(1);
    let snapshot = window.snapshot();
    assert_eq!(snapshot.total_calls(), 1);
    assert_eq!(snapshot.failed_calls(), 0);
}

#[test]
fn time_window_variants_agree_under_interleaved_advancement() {
    let clock = MockClock::new();
    let mutex_window = SlidingTimeWindow::with_clock(3, clock.clone()).unwrap();
    let lock_free_window = LockFreeSlidingTimeWindow::with_clock(3, clock.clone()).unwrap();

    let outcomes = [Outcome::Success, Outcome::Error, Outcome::SlowSuccess, Outcome::SlowError];
    for step in 0..40u64 {
        let duration = Duration::from_nanos(step * 7);
        let outcome = outcomes[(step % 4) as usize];
        assert_eq!(
            mutex_window.record(duration, outcome),
            lock_free_window.record(duration, outcome),
            "divergence at step {step}"
        );
        if step % 2 == 1 {
            clock.advance_secs(1);
        }
    }
    assert_eq!(mutex_window.snapshot(), lock_free_window.snapshot());
}

#[test]
fn sparse_writer_never_sees_stale_samples() {
    let clock = MockClock::new();
    let window = LockFreeSlidingTimeWindow::with_clock(5, clock.clone()).unwrap();

    window.record(Duration::from_nanos(999), Outcome::SlowError);
    clock.advance_secs(60);

    let snapshot = window.snapshot();
    assert_eq!(snapshot.total_calls(), 0);
    assert_eq!(snapshot.failure_rate(), 0.0);
    assert_eq!(snapshot.average_duration(), Duration::ZERO);
}

#[test]
fn snapshots_are_detached_values() {
    let window = FixedCallWindow::new(3).unwrap();
    let before = window.record(Duration::from_nanos(100), Outcome::Error);

    window.record(Duration::from_nanos(100), Outcome::Success);
    window.record(Duration::from_nanos(100), Outcome::Success);

    assert_eq!(before.total_calls(), 1);
    assert_eq!(before.failed_calls(), 1);
    assert_eq!(window.snapshot().total_calls(), 3);
}
