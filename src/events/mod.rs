//! Generic typed event processing
//!
//! [`EventProcessor`] is a pub/sub hub serving a single event hierarchy per
//! instance. Consumers subscribe either globally (every event) or keyed to
//! one event type name. Registration is serialized under a lock; dispatch
//! iterates copy-on-write consumer lists without holding any lock, so
//! consumers are free to re-enter the owning component.
//!
//! A consumer returning an error never interrupts dispatch: the failure is
//! logged and the remaining consumers are still invoked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::warn;

use crate::error::BoxedError;

/// An event that can be dispatched through an [`EventProcessor`]
///
/// `event_type` returns the stable name used to route keyed subscriptions,
/// e.g. the enum variant name.
pub trait Event {
    /// Stable type name of this event, used for keyed consumer routing
    fn event_type(&self) -> &'static str;
}

/// A subscriber receiving events of type `T`
///
/// Errors returned from `consume` are logged and swallowed by the processor.
/// Infallible closures `Fn(&T)` implement this trait directly.
pub trait EventConsumer<T>: Send + Sync {
    /// Handle one event
    fn consume(&self, event: &T) -> Result<(), BoxedError>;
}

impl<T, F> EventConsumer<T> for F
where
    F: Fn(&T) + Send + Sync,
{
    fn consume(&self, event: &T) -> Result<(), BoxedError> {
        self(event);
        Ok(())
    }
}

type ConsumerList<T> = Arc<[Arc<dyn EventConsumer<T>>]>;

/// Typed pub/sub hub with global and per-event-type subscriptions
///
/// Consumer lists are copy-on-write: registration rebuilds the list under the
/// registration lock, dispatch clones the current `Arc` and iterates without
/// locks. Every consumer present when dispatch begins receives the event; a
/// consumer registered mid-dispatch receives every subsequent one.
pub struct EventProcessor<T> {
    registration: Mutex<()>,
    on_event_consumers: RwLock<ConsumerList<T>>,
    keyed_consumers: RwLock<HashMap<&'static str, ConsumerList<T>>>,
    consumer_registered: AtomicBool,
}

impl<T> Default for EventProcessor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventProcessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("has_consumers", &self.has_consumers())
            .finish_non_exhaustive()
    }
}

impl<T> EventProcessor<T> {
    /// Create an event processor with no subscribers
    pub fn new() -> Self {
        Self {
            registration: Mutex::new(()),
            on_event_consumers: RwLock::new(Arc::from(Vec::new())),
            keyed_consumers: RwLock::new(HashMap::new()),
            consumer_registered: AtomicBool::new(false),
        }
    }

    /// Whether any consumer has ever been registered
    ///
    /// Used as the dispatch fast path: `process` returns immediately when
    /// this is false.
    pub fn has_consumers(&self) -> bool {
        self.consumer_registered.load(Ordering::Acquire)
    }

    /// Register a consumer receiving every event dispatched through this
    /// processor
    pub fn on_event<C>(&self, consumer: C)
    where
        C: EventConsumer<T> + 'static,
    {
        let _registration = self.registration.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self
            .on_event_consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut next: Vec<Arc<dyn EventConsumer<T>>> = current.iter().cloned().collect();
        next.push(Arc::new(consumer));

        *self.on_event_consumers.write().unwrap_or_else(PoisonError::into_inner) = next.into();
        self.consumer_registered.store(true, Ordering::Release);
    }

    /// Register a consumer receiving only events whose
    /// [`event_type`](Event::event_type) equals `event_type`
    pub fn register_consumer<C>(&self, event_type: &'static str, consumer: C)
    where
        C: EventConsumer<T> + 'static,
    {
        let _registration = self.registration.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self
            .keyed_consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()));
        let mut next: Vec<Arc<dyn EventConsumer<T>>> = current.iter().cloned().collect();
        next.push(Arc::new(consumer));

        self.keyed_consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_type, next.into());
        self.consumer_registered.store(true, Ordering::Release);
    }
}

impl<T: Event> EventProcessor<T> {
    /// Dispatch one event to all global consumers, then to all consumers
    /// keyed by the event's type name
    ///
    /// Returns whether any consumer was invoked. Ordering among consumers of
    /// the same group is unspecified.
    pub fn process(&self, event: &T) -> bool {
        if !self.has_consumers() {
            return false;
        }

        let mut consumed = false;

        let global =
            self.on_event_consumers.read().unwrap_or_else(PoisonError::into_inner).clone();
        if !global.is_empty() {
            for consumer in global.iter() {
                dispatch(consumer.as_ref(), event);
            }
            consumed = true;
        }

        let keyed = self
            .keyed_consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event.event_type())
            .cloned();
        if let Some(consumers) = keyed {
            if !consumers.is_empty() {
                for consumer in consumers.iter() {
                    dispatch(consumer.as_ref(), event);
                }
                consumed = true;
            }
        }

        consumed
    }
}

fn dispatch<T>(consumer: &dyn EventConsumer<T>, event: &T) {
    if let Err(error) = consumer.consume(event) {
        warn!("Event consumer failed, continuing dispatch: {}", error);
    }
}
