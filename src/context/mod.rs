//! Carrying ambient per-thread state across execution boundaries
//!
//! A [`ContextPropagator`] is the triple (retrieve, apply, clear) for one
//! kind of ambient value: `retrieve` runs on the submitting thread, `apply`
//! on the executing thread before the task body, and `clear` on the
//! executing thread after the body, whether the body returned normally or
//! panicked. Values are type-erased so heterogeneous propagators compose in
//! one list.
//!
//! Where the host runtime carries context natively in its tasks, prefer that;
//! this mechanism is the compatibility bridge for hosts holding ambient
//! thread-local state.

use std::any::Any;
use std::sync::Arc;

pub mod correlation;

/// Type-erased ambient value moved across an execution boundary
pub type ContextValue = Box<dyn Any + Send>;

/// Transports one kind of ambient thread state across a concurrency boundary
pub trait ContextPropagator: Send + Sync {
    /// Capture the ambient value on the submitting thread
    fn retrieve(&self) -> Option<ContextValue>;

    /// Install the captured value on the executing thread, before the task
    /// body
    fn apply(&self, value: Option<&(dyn Any + Send)>);

    /// Restore the executing thread's state after the task body.
    ///
    /// Invoked whether the body completed normally or panicked.
    fn clear(&self, value: Option<&(dyn Any + Send)>);
}

/// Propagator carrying nothing: `retrieve` yields `None`, `apply` and
/// `clear` are no-ops
///
/// Useful as a neutral element when composing propagator lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyContextPropagator;

impl ContextPropagator for EmptyContextPropagator {
    fn retrieve(&self) -> Option<ContextValue> {
        None
    }

    fn apply(&self, _value: Option<&(dyn Any + Send)>) {}

    fn clear(&self, _value: Option<&(dyn Any + Send)>) {}
}

/// Ambient values captured from a list of propagators at submission time
///
/// Each propagator's value is retrieved exactly once; `apply_all` and
/// `clear_all` replay the same captured values, keeping every propagator's
/// own apply/clear pair matched.
pub struct CapturedContext {
    entries: Vec<(Arc<dyn ContextPropagator>, Option<ContextValue>)>,
}

impl CapturedContext {
    /// Capture the current ambient values of every propagator on the calling
    /// thread
    pub fn capture(propagators: &[Arc<dyn ContextPropagator>]) -> Self {
        let entries = propagators
            .iter()
            .map(|propagator| (Arc::clone(propagator), propagator.retrieve()))
            .collect();
        Self { entries }
    }

    /// Install every captured value on the calling thread
    pub fn apply_all(&self) {
        for (propagator, value) in &self.entries {
            propagator.apply(value.as_ref().map(|boxed| boxed.as_ref()));
        }
    }

    /// Restore the calling thread's state for every propagator
    pub fn clear_all(&self) {
        for (propagator, value) in &self.entries {
            propagator.clear(value.as_ref().map(|boxed| boxed.as_ref()));
        }
    }
}

impl std::fmt::Debug for CapturedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedContext").field("entries", &self.entries.len()).finish()
    }
}

struct ClearGuard<'a> {
    captured: &'a CapturedContext,
}

impl Drop for ClearGuard<'_> {
    fn drop(&mut self) {
        self.captured.clear_all();
    }
}

/// Decorate a closure so the current ambient state travels with it.
///
/// The values are captured immediately, on the calling thread. When the
/// returned closure later runs, each propagator installs its value before
/// the body and restores its state afterwards, panicking bodies included.
pub fn decorate_closure<R>(
    propagators: &[Arc<dyn ContextPropagator>],
    body: impl FnOnce() -> R,
) -> impl FnOnce() -> R {
    let captured = CapturedContext::capture(propagators);
    move || {
        captured.apply_all();
        let _guard = ClearGuard { captured: &captured };
        body()
    }
}
