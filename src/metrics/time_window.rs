//! Time-based sliding windows
//!
//! Both windows aggregate the calls recorded during the last W whole seconds.
//! The ring holds one bucket per second, indexed by epoch-second modulo W and
//! tagged with the second it covers; stale buckets are recycled lazily. Time
//! is read from the window's [`Clock`], so tests drive eviction with a
//! [`MockClock`](crate::clock::MockClock) instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};
use crate::metrics::{duration_to_nanos, Aggregation, Metrics, Outcome, Snapshot};

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Mutex-guarded time-based sliding window over the last W seconds
///
/// The reference implementation. A sweep before every record and snapshot
/// recycles each bucket whose second has aged out of the window, so a
/// snapshot never includes a sample older than W seconds, no matter how
/// sparsely writers arrive.
#[derive(Debug)]
pub struct SlidingTimeWindow<C = SystemClock> {
    window_seconds: u64,
    clock: C,
    inner: Mutex<TimeState>,
}

#[derive(Debug)]
struct TimeBucket {
    epoch_second: u64,
    aggregation: Aggregation,
}

#[derive(Debug)]
struct TimeState {
    buckets: Box<[TimeBucket]>,
    aggregate: Aggregation,
}

impl SlidingTimeWindow<SystemClock> {
    /// Create a window over the last `window_seconds` seconds using the
    /// system clock
    pub fn new(window_seconds: u64) -> CoreResult<Self> {
        Self::with_clock(window_seconds, SystemClock)
    }
}

impl<C: Clock> SlidingTimeWindow<C> {
    /// Create a window with a custom clock (useful for testing)
    pub fn with_clock(window_seconds: u64, clock: C) -> CoreResult<Self> {
        check_window_seconds(window_seconds)?;
        let now_second = clock.monotonic_nanos() / NANOS_PER_SECOND;
        let buckets = (0..window_seconds)
            .map(|_| TimeBucket { epoch_second: now_second, aggregation: Aggregation::default() })
            .collect::<Vec<_>>();
        Ok(Self {
            window_seconds,
            clock,
            inner: Mutex::new(TimeState {
                buckets: buckets.into_boxed_slice(),
                aggregate: Aggregation::default(),
            }),
        })
    }

    fn current_second(&self) -> u64 {
        self.clock.monotonic_nanos() / NANOS_PER_SECOND
    }

    /// Recycle every bucket whose second is outside the window ending at
    /// `now_second`
    fn sweep_stale(&self, state: &mut TimeState, now_second: u64) {
        for bucket in state.buckets.iter_mut() {
            if bucket.epoch_second + self.window_seconds <= now_second
                && !bucket.aggregation.is_empty()
            {
                state.aggregate.discard(&bucket.aggregation);
                bucket.aggregation = Aggregation::default();
            }
        }
    }
}

impl<C: Clock> Metrics for SlidingTimeWindow<C> {
    fn record(&self, duration: Duration, outcome: Outcome) -> Snapshot {
        let duration_nanos = duration_to_nanos(duration);
        let now_second = self.current_second();
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;

        self.sweep_stale(state, now_second);

        let index = (now_second % self.window_seconds) as usize;
        let bucket = &mut state.buckets[index];
        if bucket.epoch_second != now_second {
            let stale = bucket.aggregation;
            bucket.epoch_second = now_second;
            bucket.aggregation = Aggregation::default();
            state.aggregate.discard(&stale);
        }

        state.buckets[index].aggregation.record(duration_nanos, outcome);
        state.aggregate.record(duration_nanos, outcome);
        Snapshot::from_aggregation(&state.aggregate)
    }

    fn snapshot(&self) -> Snapshot {
        let now_second = self.current_second();
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        self.sweep_stale(state, now_second);
        Snapshot::from_aggregation(&state.aggregate)
    }
}

/// Lock-free time-based sliding window over the last W seconds
///
/// Every bucket carries atomic counters plus an atomic epoch tag. A CAS on
/// the tag elects a single recycler per second transition; snapshots sum the
/// buckets whose second lies inside the window, which subsumes lazy eviction
/// without a sweep. A record racing a recycle on the same bucket may be
/// attributed to the new second; quiescent sums are exact.
#[derive(Debug)]
pub struct LockFreeSlidingTimeWindow<C = SystemClock> {
    window_seconds: u64,
    clock: C,
    buckets: Box<[AtomicBucket]>,
}

#[derive(Debug)]
struct AtomicBucket {
    epoch_second: AtomicU64,
    total_calls: AtomicU64,
    failed_calls: AtomicU64,
    slow_calls: AtomicU64,
    slow_failed_calls: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicBucket {
    fn new(epoch_second: u64) -> Self {
        Self {
            epoch_second: AtomicU64::new(epoch_second),
            total_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            slow_calls: AtomicU64::new(0),
            slow_failed_calls: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    fn reset_counters(&self) {
        self.total_calls.store(0, Ordering::Release);
        self.failed_calls.store(0, Ordering::Release);
        self.slow_calls.store(0, Ordering::Release);
        self.slow_failed_calls.store(0, Ordering::Release);
        self.total_duration_nanos.store(0, Ordering::Release);
    }
}

impl LockFreeSlidingTimeWindow<SystemClock> {
    /// Create a window over the last `window_seconds` seconds using the
    /// system clock
    pub fn new(window_seconds: u64) -> CoreResult<Self> {
        Self::with_clock(window_seconds, SystemClock)
    }
}

impl<C: Clock> LockFreeSlidingTimeWindow<C> {
    /// Create a window with a custom clock (useful for testing)
    pub fn with_clock(window_seconds: u64, clock: C) -> CoreResult<Self> {
        check_window_seconds(window_seconds)?;
        let now_second = clock.monotonic_nanos() / NANOS_PER_SECOND;
        let buckets =
            (0..window_seconds).map(|_| AtomicBucket::new(now_second)).collect::<Vec<_>>();
        Ok(Self { window_seconds, clock, buckets: buckets.into_boxed_slice() })
    }

    fn current_second(&self) -> u64 {
        self.clock.monotonic_nanos() / NANOS_PER_SECOND
    }

    /// Claim the bucket for `now_second`, recycling it if it still carries an
    /// older second
    fn claim_bucket(&self, now_second: u64) -> &AtomicBucket {
        let bucket = &self.buckets[(now_second % self.window_seconds) as usize];
        loop {
            let tagged = bucket.epoch_second.load(Ordering::Acquire);
            if tagged == now_second {
                return bucket;
            }
            if bucket
                .epoch_second
                .compare_exchange(tagged, now_second, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                bucket.reset_counters();
                return bucket;
            }
        }
    }

    fn sum_live_buckets(&self, now_second: u64) -> Snapshot {
        let mut aggregation = Aggregation::default();
        let window_start = now_second.saturating_sub(self.window_seconds - 1);
        for bucket in self.buckets.iter() {
            let second = bucket.epoch_second.load(Ordering::Acquire);
            if second < window_start || second > now_second {
                continue;
            }
            aggregation.total_calls += bucket.total_calls.load(Ordering::Acquire);
            aggregation.failed_calls += bucket.failed_calls.load(Ordering::Acquire);
            aggregation.slow_calls += bucket.slow_calls.load(Ordering::Acquire);
            aggregation.slow_failed_calls += bucket.slow_failed_calls.load(Ordering::Acquire);
            aggregation.total_duration_nanos = aggregation
                .total_duration_nanos
                .saturating_add(bucket.total_duration_nanos.load(Ordering::Acquire));
        }
        Snapshot::from_aggregation(&aggregation)
    }
}

impl<C: Clock> Metrics for LockFreeSlidingTimeWindow<C> {
    fn record(&self, duration: Duration, outcome: Outcome) -> Snapshot {
        let duration_nanos = duration_to_nanos(duration);
        let now_second = self.current_second();

        let bucket = self.claim_bucket(now_second);
        bucket.total_calls.fetch_add(1, Ordering::AcqRel);
        bucket.total_duration_nanos.fetch_add(duration_nanos, Ordering::AcqRel);
        if outcome.is_failure() {
            bucket.failed_calls.fetch_add(1, Ordering::AcqRel);
        }
        if outcome.is_slow() {
            bucket.slow_calls.fetch_add(1, Ordering::AcqRel);
        }
        if outcome == Outcome::SlowError {
            bucket.slow_failed_calls.fetch_add(1, Ordering::AcqRel);
        }

        self.sum_live_buckets(now_second)
    }

    fn snapshot(&self) -> Snapshot {
        self.sum_live_buckets(self.current_second())
    }
}

fn check_window_seconds(window_seconds: u64) -> CoreResult<()> {
    if window_seconds < 1 {
        return Err(CoreError::validation("window size must be at least 1 second"));
    }
    Ok(())
}
