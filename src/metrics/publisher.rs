//! Bridging registry lifecycle events to metrics publication
//!
//! A metrics publisher is a pair of capabilities, publish and remove, rather
//! than a base type to extend. [`bind_to_registry`] wires a publisher to a
//! registry's lifecycle stream: added entries are published, removed entries
//! are retired, and a replacement retires the old entry before publishing the
//! new one.

use std::sync::Arc;

use crate::registry::Registry;

/// Publishes and retires per-entry metrics
pub trait MetricsPublisher<E>: Send + Sync {
    /// Start publishing metrics for `entry`
    fn publish_metrics(&self, entry: &E);

    /// Stop publishing metrics for `entry`
    fn remove_metrics(&self, entry: &E);
}

/// Subscribe `publisher` to the lifecycle events of `registry`
pub fn bind_to_registry<E, C, P>(publisher: Arc<P>, registry: &Registry<E, C>)
where
    E: Clone + Send + Sync + 'static,
    P: MetricsPublisher<E> + 'static,
{
    let on_added = Arc::clone(&publisher);
    registry.on_entry_added(move |_name, entry| on_added.publish_metrics(entry));

    let on_removed = Arc::clone(&publisher);
    registry.on_entry_removed(move |_name, entry| on_removed.remove_metrics(entry));

    registry.on_entry_replaced(move |_name, old_entry, new_entry| {
        publisher.remove_metrics(old_entry);
        publisher.publish_metrics(new_entry);
    });
}
