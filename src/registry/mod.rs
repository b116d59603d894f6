//! Observable keyed registries of named entries
//!
//! A [`Registry`] layers configuration-by-name, an immutable tag map, and a
//! lifecycle event stream over a pluggable [`RegistryStore`]. Every mutating
//! operation publishes an [`RegistryEvent`] (`EntryAdded`, `EntryRemoved`,
//! `EntryReplaced`) through an embedded
//! [`EventProcessor`](crate::events::EventProcessor); lifecycle events are
//! best-effort and never fail the mutation that triggered them.
//!
//! Entry identity is the externally supplied name: a non-empty, case-sensitive
//! string, unique per registry.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventProcessor};

pub mod store;

pub use store::{InMemoryRegistryStore, RegistryStore};

/// Name of the guaranteed-present default configuration
pub const DEFAULT_CONFIG: &str = "default";

/// Lifecycle event published when a registry entry is mutated
///
/// Carries the wall-clock creation time of the event in milliseconds since
/// the Unix epoch.
#[derive(Debug, Clone)]
pub enum RegistryEvent<E> {
    /// A new entry was created through `compute_if_absent`
    EntryAdded { entry_name: String, added_entry: E, created_at_millis: u64 },
    /// An entry was removed
    EntryRemoved { entry_name: String, removed_entry: E, created_at_millis: u64 },
    /// An existing entry was replaced by a new one
    EntryReplaced { entry_name: String, old_entry: E, new_entry: E, created_at_millis: u64 },
}

impl<E> RegistryEvent<E> {
    /// Name of the entry this event concerns
    pub fn entry_name(&self) -> &str {
        match self {
            RegistryEvent::EntryAdded { entry_name, .. }
            | RegistryEvent::EntryRemoved { entry_name, .. }
            | RegistryEvent::EntryReplaced { entry_name, .. } => entry_name,
        }
    }

    /// Wall-clock creation time of this event
    pub fn created_at_millis(&self) -> u64 {
        match self {
            RegistryEvent::EntryAdded { created_at_millis, .. }
            | RegistryEvent::EntryRemoved { created_at_millis, .. }
            | RegistryEvent::EntryReplaced { created_at_millis, .. } => *created_at_millis,
        }
    }
}

impl<E> Event for RegistryEvent<E> {
    fn event_type(&self) -> &'static str {
        match self {
            RegistryEvent::EntryAdded { .. } => "EntryAdded",
            RegistryEvent::EntryRemoved { .. } => "EntryRemoved",
            RegistryEvent::EntryReplaced { .. } => "EntryReplaced",
        }
    }
}

/// Concurrent, observable keyed store of named entries
///
/// `E` is the entry type (wrap in `Arc` for shared instances), `C` the
/// configuration type. A registry always owns a default configuration; named
/// configurations can be added and removed at runtime, but the default is
/// permanent.
pub struct Registry<E, C = ()> {
    store: Arc<dyn RegistryStore<E>>,
    default_config: C,
    configurations: RwLock<HashMap<String, C>>,
    tags: HashMap<String, String>,
    event_processor: EventProcessor<RegistryEvent<E>>,
    clock: Arc<dyn Clock>,
}

impl<E, C> std::fmt::Debug for Registry<E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("tags", &self.tags).finish_non_exhaustive()
    }
}

impl<E, C> Registry<E, C>
where
    E: Clone + Send + Sync + 'static,
{
    /// Create a registry with the given default configuration, an in-memory
    /// store, and no tags
    pub fn new(default_config: C) -> Self {
        RegistryBuilder::new(default_config).build()
    }

    /// Create a registry builder
    pub fn builder(default_config: C) -> RegistryBuilder<E, C> {
        RegistryBuilder::new(default_config)
    }

    /// Return the entry named `name`, creating it with `factory` when absent.
    ///
    /// The factory runs at most once per name even under concurrent access;
    /// every caller observes the same entry. Publishes `EntryAdded` only when
    /// the entry was actually created.
    pub fn compute_if_absent<F>(&self, name: &str, factory: F) -> CoreResult<E>
    where
        F: Fn(&str) -> E,
    {
        check_entry_name(name)?;

        let created = Cell::new(false);
        let entry = self.store.compute_if_absent(name, &|key| {
            created.set(true);
            factory(key)
        });

        if created.get() {
            debug!("Registry entry '{}' added", name);
            self.publish(RegistryEvent::EntryAdded {
                entry_name: name.to_owned(),
                added_entry: entry.clone(),
                created_at_millis: self.clock.wall_time_millis(),
            });
        }
        Ok(entry)
    }

    /// Look up the entry named `name`
    pub fn find(&self, name: &str) -> Option<E> {
        self.store.find(name)
    }

    /// Remove the entry named `name`, publishing `EntryRemoved` when it
    /// existed
    pub fn remove(&self, name: &str) -> Option<E> {
        let removed = self.store.remove(name)?;
        debug!("Registry entry '{}' removed", name);
        self.publish(RegistryEvent::EntryRemoved {
            entry_name: name.to_owned(),
            removed_entry: removed.clone(),
            created_at_millis: self.clock.wall_time_millis(),
        });
        Some(removed)
    }

    /// Replace the entry named `name`, publishing `EntryReplaced` when it
    /// existed.
    ///
    /// A no-op returning `None` when the name is unknown.
    pub fn replace(&self, name: &str, new_entry: E) -> Option<E> {
        let old = self.store.replace(name, new_entry.clone())?;
        debug!("Registry entry '{}' replaced", name);
        self.publish(RegistryEvent::EntryReplaced {
            entry_name: name.to_owned(),
            old_entry: old.clone(),
            new_entry,
            created_at_millis: self.clock.wall_time_millis(),
        });
        Some(old)
    }

    /// Snapshot of all managed entries
    pub fn values(&self) -> Vec<E> {
        self.store.values()
    }

    /// The registry's lifecycle event stream
    pub fn event_publisher(&self) -> &EventProcessor<RegistryEvent<E>> {
        &self.event_processor
    }

    /// Subscribe to `EntryAdded` events with `(name, added_entry)`
    pub fn on_entry_added<F>(&self, consumer: F)
    where
        F: Fn(&str, &E) + Send + Sync + 'static,
    {
        self.event_processor.register_consumer("EntryAdded", move |event: &RegistryEvent<E>| {
            if let RegistryEvent::EntryAdded { entry_name, added_entry, .. } = event {
                consumer(entry_name, added_entry);
            }
        });
    }

    /// Subscribe to `EntryRemoved` events with `(name, removed_entry)`
    pub fn on_entry_removed<F>(&self, consumer: F)
    where
        F: Fn(&str, &E) + Send + Sync + 'static,
    {
        self.event_processor.register_consumer("EntryRemoved", move |event: &RegistryEvent<E>| {
            if let RegistryEvent::EntryRemoved { entry_name, removed_entry, .. } = event {
                consumer(entry_name, removed_entry);
            }
        });
    }

    /// Subscribe to `EntryReplaced` events with `(name, old_entry, new_entry)`
    pub fn on_entry_replaced<F>(&self, consumer: F)
    where
        F: Fn(&str, &E, &E) + Send + Sync + 'static,
    {
        self.event_processor.register_consumer("EntryReplaced", move |event: &RegistryEvent<E>| {
            if let RegistryEvent::EntryReplaced { entry_name, old_entry, new_entry, .. } = event {
                consumer(entry_name, old_entry, new_entry);
            }
        });
    }

    fn publish(&self, event: RegistryEvent<E>) {
        // Best-effort: consumer failures are swallowed by the processor and
        // never fail the mutation.
        self.event_processor.process(&event);
    }
}

impl<E, C> Registry<E, C>
where
    C: Clone,
{
    /// Register a named configuration.
    ///
    /// The name `"default"` is reserved and rejected with a validation error.
    pub fn add_configuration(&self, name: impl Into<String>, config: C) -> CoreResult<()> {
        let name = name.into();
        if name == DEFAULT_CONFIG {
            return Err(CoreError::validation(
                "you cannot register a configuration under the reserved name 'default'",
            ));
        }
        self.configurations.write().unwrap_or_else(PoisonError::into_inner).insert(name, config);
        Ok(())
    }

    /// Look up a named configuration.
    ///
    /// `"default"` resolves to the default configuration; any other unknown
    /// name fails with
    /// [`ConfigurationNotFound`](crate::CoreError::ConfigurationNotFound).
    pub fn configuration(&self, name: &str) -> CoreResult<C> {
        if let Some(config) =
            self.configurations.read().unwrap_or_else(PoisonError::into_inner).get(name)
        {
            return Ok(config.clone());
        }
        if name == DEFAULT_CONFIG {
            return Ok(self.default_config.clone());
        }
        Err(CoreError::configuration_not_found(name))
    }

    /// Remove a named configuration, returning it when present.
    ///
    /// The default configuration is not removable.
    pub fn remove_configuration(&self, name: &str) -> CoreResult<Option<C>> {
        if name == DEFAULT_CONFIG {
            return Err(CoreError::validation("the default configuration cannot be removed"));
        }
        Ok(self.configurations.write().unwrap_or_else(PoisonError::into_inner).remove(name))
    }
}

impl<E, C> Registry<E, C> {
    /// The default configuration, present for the registry's whole lifetime
    pub fn default_config(&self) -> &C {
        &self.default_config
    }

    /// The immutable tag map set at construction
    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }
}

/// Builder for [`Registry`]
pub struct RegistryBuilder<E, C> {
    default_config: C,
    configurations: HashMap<String, C>,
    tags: HashMap<String, String>,
    store: Option<Arc<dyn RegistryStore<E>>>,
    clock: Arc<dyn Clock>,
}

impl<E, C> RegistryBuilder<E, C>
where
    E: Clone + Send + Sync + 'static,
{
    /// Start a builder seeded with the default configuration
    pub fn new(default_config: C) -> Self {
        Self {
            default_config,
            configurations: HashMap::new(),
            tags: HashMap::new(),
            store: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Add an immutable tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add all entries of `tags` as immutable tags
    pub fn tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Seed a named configuration.
    ///
    /// The reserved name `"default"` is rejected at `build` time.
    pub fn configuration(mut self, name: impl Into<String>, config: C) -> Self {
        self.configurations.insert(name.into(), config);
        self
    }

    /// Use a custom backing store instead of the in-memory default
    pub fn store(mut self, store: Arc<dyn RegistryStore<E>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a custom clock for event timestamps (useful for testing)
    pub fn clock<K: Clock>(mut self, clock: K) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Build the registry.
    ///
    /// Panics are never used for validation here; the only invalid builder
    /// state, a seeded configuration named `"default"`, is stripped by
    /// `try_build`. This infallible variant asserts the common case.
    pub fn build(self) -> Registry<E, C> {
        self.try_build().expect("builder configurations must not use the reserved name 'default'")
    }

    /// Build the registry, rejecting a seeded configuration named `"default"`
    pub fn try_build(self) -> CoreResult<Registry<E, C>> {
        if self.configurations.contains_key(DEFAULT_CONFIG) {
            return Err(CoreError::validation(
                "you cannot register a configuration under the reserved name 'default'",
            ));
        }
        Ok(Registry {
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryRegistryStore::new())),
            default_config: self.default_config,
            configurations: RwLock::new(self.configurations),
            tags: self.tags,
            event_processor: EventProcessor::new(),
            clock: self.clock,
        })
    }
}

fn check_entry_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::validation("entry name must not be empty"));
    }
    Ok(())
}
