//! Count-based sliding windows
//!
//! Both windows in this file aggregate exactly the last N recorded calls once
//! N calls have been made; before that, only the calls actually recorded
//! contribute. Each slot of the ring holds one sample. Recording a call
//! evicts whatever the target slot held, applies the delta to the mirrored
//! aggregate, and advances the insertion index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::metrics::{duration_to_nanos, Aggregation, Metrics, Outcome, Snapshot};

/// Mutex-guarded count-based sliding window over the last N calls
///
/// The reference implementation: a single lock around `record` and
/// `snapshot` keeps the slots and the aggregate exactly consistent at every
/// point.
#[derive(Debug)]
pub struct FixedCallWindow {
    inner: Mutex<FixedCallState>,
}

#[derive(Debug)]
struct FixedCallState {
    slots: Box<[Aggregation]>,
    head: usize,
    aggregate: Aggregation,
}

impl FixedCallWindow {
    /// Create a window over the last `window_size` calls
    pub fn new(window_size: usize) -> CoreResult<Self> {
        check_window_size(window_size)?;
        Ok(Self {
            inner: Mutex::new(FixedCallState {
                slots: vec![Aggregation::default(); window_size].into_boxed_slice(),
                head: 0,
                aggregate: Aggregation::default(),
            }),
        })
    }
}

impl Metrics for FixedCallWindow {
    fn record(&self, duration: Duration, outcome: Outcome) -> Snapshot {
        let duration_nanos = duration_to_nanos(duration);
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;

        let head = state.head;
        let evicted = state.slots[head];
        state.aggregate.discard(&evicted);

        let mut sample = Aggregation::default();
        sample.record(duration_nanos, outcome);
        state.slots[head] = sample;
        state.aggregate.record(duration_nanos, outcome);

        state.head = (head + 1) % state.slots.len();
        Snapshot::from_aggregation(&state.aggregate)
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Snapshot::from_aggregation(&state.aggregate)
    }
}

// Packed sample layout for the lock-free window: bit 63 marks the slot
// occupied, bits 62..61 carry the outcome, bits 60..0 the duration in
// nanoseconds (saturated; ~36 years of headroom).
const OCCUPIED_BIT: u64 = 1 << 63;
const OUTCOME_SHIFT: u32 = 61;
const DURATION_MASK: u64 = (1 << OUTCOME_SHIFT) - 1;

fn pack_sample(duration_nanos: u64, outcome: Outcome) -> u64 {
    let outcome_bits = match outcome {
        Outcome::Success => 0u64,
        Outcome::Error => 1,
        Outcome::SlowSuccess => 2,
        Outcome::SlowError => 3,
    };
    OCCUPIED_BIT | (outcome_bits << OUTCOME_SHIFT) | duration_nanos.min(DURATION_MASK)
}

fn unpack_sample(packed: u64) -> (u64, Outcome) {
    let outcome = match (packed >> OUTCOME_SHIFT) & 0b11 {
        0 => Outcome::Success,
        1 => Outcome::Error,
        2 => Outcome::SlowSuccess,
        _ => Outcome::SlowError,
    };
    (packed & DURATION_MASK, outcome)
}

/// Lock-free count-based sliding window over the last N calls
///
/// A sequence counter assigns each record a slot; an atomic swap on the slot
/// yields the evicted sample, and the deltas are applied to per-field atomic
/// aggregates. The aggregates are the source of truth and equal the per-slot
/// sums at every quiescent point; a snapshot racing a record on another
/// thread may observe that record's fields partially applied.
#[derive(Debug)]
pub struct LockFreeFixedCallWindow {
    slots: Box<[AtomicU64]>,
    sequence: AtomicU64,
    total_calls: AtomicU64,
    failed_calls: AtomicU64,
    slow_calls: AtomicU64,
    slow_failed_calls: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl LockFreeFixedCallWindow {
    /// Create a window over the last `window_size` calls
    pub fn new(window_size: usize) -> CoreResult<Self> {
        check_window_size(window_size)?;
        let slots = (0..window_size).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();
        Ok(Self {
            slots: slots.into_boxed_slice(),
            sequence: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            slow_calls: AtomicU64::new(0),
            slow_failed_calls: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        })
    }

    fn apply_delta(&self, duration_nanos: u64, outcome: Outcome, add: bool) {
        let bump = |field: &AtomicU64, amount: u64| {
            if add {
                field.fetch_add(amount, Ordering::AcqRel);
            } else {
                field.fetch_sub(amount, Ordering::AcqRel);
            }
        };
        bump(&self.total_calls, 1);
        bump(&self.total_duration_nanos, duration_nanos);
        if outcome.is_failure() {
            bump(&self.failed_calls, 1);
        }
        if outcome.is_slow() {
            bump(&self.slow_calls, 1);
        }
        if outcome == Outcome::SlowError {
            bump(&self.slow_failed_calls, 1);
        }
    }

    fn load_snapshot(&self) -> Snapshot {
        let mut aggregation = Aggregation::default();
        aggregation.total_calls = self.total_calls.load(Ordering::Acquire);
        aggregation.failed_calls = self.failed_calls.load(Ordering::Acquire);
        aggregation.slow_calls = self.slow_calls.load(Ordering::Acquire);
        aggregation.slow_failed_calls = self.slow_failed_calls.load(Ordering::Acquire);
        aggregation.total_duration_nanos = self.total_duration_nanos.load(Ordering::Acquire);
        Snapshot::from_aggregation(&aggregation)
    }
}

impl Metrics for LockFreeFixedCallWindow {
    fn record(&self, duration: Duration, outcome: Outcome) -> Snapshot {
        let duration_nanos = duration_to_nanos(duration).min(DURATION_MASK);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let slot = (sequence % self.slots.len() as u64) as usize;

        let evicted = self.slots[slot].swap(pack_sample(duration_nanos, outcome), Ordering::AcqRel);
        self.apply_delta(duration_nanos, outcome, true);
        if evicted & OCCUPIED_BIT != 0 {
            let (evicted_nanos, evicted_outcome) = unpack_sample(evicted);
            self.apply_delta(evicted_nanos, evicted_outcome, false);
        }

        self.load_snapshot()
    }

    fn snapshot(&self) -> Snapshot {
        self.load_snapshot()
    }
}

fn check_window_size(window_size: usize) -> CoreResult<()> {
    if window_size < 1 {
        return Err(CoreError::validation("window size must be at least 1"));
    }
    Ok(())
}
