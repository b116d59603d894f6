//! Core fault-tolerance primitives.
//!
//! This crate is the reusable substrate for resilience patterns: circuit
//! breakers, retriers, rate limiters, and bulkheads are policies layered on
//! top of the primitives here. The crate itself never decides *when* a
//! circuit opens or *how many* retries are allowed; it provides the
//! machinery those policies share:
//!
//! - **Sliding-window metrics** ([`metrics`]): bucketed aggregation over the
//!   last N calls or the last W seconds, with four outcome classes and cheap
//!   immutable snapshots.
//! - **Observable registries** ([`registry`]): concurrent keyed stores of
//!   named instances with pluggable backing storage, named configurations,
//!   tags, and lifecycle events.
//! - **Typed event processing** ([`events`]): the pub/sub hub every
//!   component uses to publish events to global and per-type subscribers.
//! - **Interval functions** ([`interval`]): pure attempt-to-delay mappings
//!   for the usual backoff families.
//! - **Context propagation** ([`context`], [`scheduler`]): carrying ambient
//!   per-thread state, including the logging correlation map, across
//!   scheduling boundaries.
//! - **Clocks and stopwatches** ([`clock`]): the time abstraction that keeps
//!   all of the above deterministic under test.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use faultline::metrics::{FixedCallWindow, Metrics, Outcome};
//!
//! # fn main() -> Result<(), faultline::CoreError> {
//! let window = FixedCallWindow::new(100)?;
//! let snapshot = window.record(Duration::from_millis(12), Outcome::Success);
//! assert_eq!(snapshot.total_calls(), 1);
//! assert_eq!(snapshot.failure_rate(), 0.0);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod clock;
pub mod context;
pub mod error;
pub mod events;
pub mod interval;
pub mod metrics;
pub mod registry;
pub mod scheduler;

// Re-export commonly used types for convenience
// ------------------------------
pub use clock::{Clock, MockClock, Stopwatch, SystemClock};
pub use context::{CapturedContext, ContextPropagator, EmptyContextPropagator};
pub use error::{BoxedError, CoreError, CoreResult};
pub use events::{Event, EventConsumer, EventProcessor};
pub use interval::{IntervalBiFn, IntervalFn};
pub use metrics::{
    FixedCallWindow, LockFreeFixedCallWindow, LockFreeSlidingTimeWindow, Metrics,
    MetricsPublisher, Outcome, SlidingTimeWindow, Snapshot,
};
pub use registry::{InMemoryRegistryStore, Registry, RegistryEvent, RegistryStore};
pub use scheduler::{ContextAwareScheduler, NamingThreadFactory, ScheduledTask, TaskHandle};
