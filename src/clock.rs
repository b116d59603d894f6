//! Time abstraction for testability
//!
//! The [`Clock`] trait lets components use real system time in production and
//! controlled mock time in tests, enabling deterministic testing of
//! time-based behavior without actual delays. Wall time may jump and is only
//! suitable for human-visible timestamps; monotonic time is the sole basis
//! for interval measurement in this crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Trait for time operations to enable deterministic testing
pub trait Clock: Send + Sync + 'static {
    /// Get the current wall-clock time as milliseconds since the Unix epoch.
    ///
    /// Wall time may jump backwards or forwards when the system clock is
    /// adjusted. Never use it to measure intervals.
    fn wall_time_millis(&self) -> u64;

    /// Get a monotonic reading in nanoseconds.
    ///
    /// The value is guaranteed non-decreasing across a single process. The
    /// origin is unspecified; only differences between two readings are
    /// meaningful.
    fn monotonic_nanos(&self) -> u64;
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Monotonic anchor shared by every `SystemClock` instance.
    fn anchor() -> Instant {
        static ANCHOR: OnceLock<Instant> = OnceLock::new();
        *ANCHOR.get_or_init(Instant::now)
    }
}

impl Clock for SystemClock {
    fn wall_time_millis(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }

    fn monotonic_nanos(&self) -> u64 {
        Self::anchor().elapsed().as_nanos() as u64
    }
}

/// Implement Clock for Arc<T> where T: Clock for convenient sharing
impl<T: Clock> Clock for Arc<T> {
    fn wall_time_millis(&self) -> u64 {
        (**self).wall_time_millis()
    }

    fn monotonic_nanos(&self) -> u64 {
        (**self).monotonic_nanos()
    }
}

/// Mock clock for deterministic testing
///
/// Holds both timelines in shared atomics so that clones observe the same
/// readings. Tests advance time explicitly instead of sleeping.
#[derive(Debug, Clone)]
pub struct MockClock {
    wall_millis: Arc<AtomicU64>,
    monotonic_nanos: Arc<AtomicU64>,
}

impl MockClock {
    /// Create a new mock clock with both timelines at zero
    pub fn new() -> Self {
        Self {
            wall_millis: Arc::new(AtomicU64::new(0)),
            monotonic_nanos: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance both timelines by a duration
    pub fn advance(&self, duration: Duration) {
        self.wall_millis.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        self.monotonic_nanos.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Advance both timelines by milliseconds (convenience method)
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Advance both timelines by whole seconds (convenience method)
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Set the wall-clock timeline to a specific value
    pub fn set_wall_time_millis(&self, millis: u64) {
        self.wall_millis.store(millis, Ordering::SeqCst);
    }

    /// Set the monotonic timeline to a specific value
    pub fn set_monotonic_nanos(&self, nanos: u64) {
        self.monotonic_nanos.store(nanos, Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn wall_time_millis(&self) -> u64 {
        self.wall_millis.load(Ordering::SeqCst)
    }

    fn monotonic_nanos(&self) -> u64 {
        self.monotonic_nanos.load(Ordering::SeqCst)
    }
}

/// Records a monotonic start instant and yields the elapsed duration on
/// demand
///
/// The start instant is captured once at construction and never reset;
/// `elapsed` may be called any number of times.
#[derive(Debug, Clone)]
pub struct Stopwatch<C = SystemClock> {
    clock: C,
    start_nanos: u64,
}

impl Stopwatch<SystemClock> {
    /// Start a stopwatch against the system clock
    pub fn start() -> Self {
        Self::start_with_clock(SystemClock)
    }
}

impl<C: Clock> Stopwatch<C> {
    /// Start a stopwatch against a custom clock (useful for testing)
    pub fn start_with_clock(clock: C) -> Self {
        let start_nanos = clock.monotonic_nanos();
        Self { clock, start_nanos }
    }

    /// Elapsed time since the stopwatch was started
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.clock.monotonic_nanos().saturating_sub(self.start_nanos))
    }
}
