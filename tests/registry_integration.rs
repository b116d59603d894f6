//! Integration tests for the registry and event substrate
//!
//! Drives a registry holding shared metrics windows the way a circuit
//! breaker implementation would, and verifies the lifecycle event stream,
//! the configuration table, and the metrics-publisher bridge end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use faultline::metrics::{bind_to_registry, FixedCallWindow, Metrics, MetricsPublisher, Outcome};
use faultline::{CoreError, Registry, RegistryEvent};

type SharedWindow = Arc<FixedCallWindow>;

#[derive(Debug, Clone, PartialEq)]
struct WindowConfig {
    window_size: usize,
}

fn window_registry() -> Registry<SharedWindow, WindowConfig> {
    Registry::builder(WindowConfig { window_size: 16 })
        .tag("component", "metrics")
        .configuration("small", WindowConfig { window_size: 4 })
        .build()
}

#[test]
fn entries_are_created_once_and_shared() {
    let registry = window_registry();
    let factory_calls = AtomicUsize::new(0);

    let default_size = registry.default_config().window_size;
    let first = registry
        .compute_if_absent("backend-a", |_| {
            factory_calls.fetch_add(1, Ordering::SeqCst);
            Arc::new(FixedCallWindow::new(default_size).unwrap())
        })
        .unwrap();
    let second = registry
        .compute_if_absent("backend-a", |_| {
            factory_calls.fetch_add(1, Ordering::SeqCst);
            Arc::new(FixedCallWindow::new(default_size).unwrap())
        })
        .unwrap();

    assert_eq!(factory_calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second), "both callers must observe the same instance");

    // Samples recorded through one handle are visible through the other.
    first.record(Duration::from_millis(3), Outcome::Error);
    assert_eq!(second.snapshot().failed_calls(), 1);
}

#[test]
fn lifecycle_events_fire_in_order() {
    let registry = window_registry();
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&log);
    registry.event_publisher().on_event(move |event: &RegistryEvent<SharedWindow>| {
        let label = match event {
            RegistryEvent::EntryAdded { .. } => "added",
            RegistryEvent::EntryRemoved { .. } => "removed",
            RegistryEvent::EntryReplaced { .. } => "replaced",
        };
        sink.lock().unwrap().push(format!("{label}:{}", event.entry_name()));
    });

    registry
        .compute_if_absent("backend-a", |_| Arc::new(FixedCallWindow::new(4).unwrap()))
        .unwrap();
    assert!(registry.replace("backend-a", Arc::new(FixedCallWindow::new(8).unwrap())).is_some());
    assert!(registry.remove("backend-a").is_some());
    assert!(registry.remove("backend-a").is_none(), "second remove emits nothing");

    let log = log.lock().unwrap();
    assert_eq!(
        *log,
        vec!["added:backend-a".to_owned(), "replaced:backend-a".to_owned(), "removed:backend-a".to_owned()]
    );
}

#[test]
fn configuration_table_round_trip() {
    let registry = window_registry();

    assert_eq!(registry.configuration("small").unwrap().window_size, 4);
    assert_eq!(registry.configuration("default").unwrap().window_size, 16);

    registry.add_configuration("large", WindowConfig { window_size: 128 }).unwrap();
    assert_eq!(registry.configuration("large").unwrap().window_size, 128);

    registry.remove_configuration("large").unwrap();
    assert!(matches!(
        registry.configuration("large"),
        Err(CoreError::ConfigurationNotFound { .. })
    ));

    assert!(registry.remove_configuration("default").is_err());
    assert_eq!(registry.tags()["component"], "metrics");
}

#[derive(Default)]
struct CountingPublisher {
    published: AtomicUsize,
    removed: AtomicUsize,
}

impl MetricsPublisher<SharedWindow> for CountingPublisher {
    fn publish_metrics(&self, _entry: &SharedWindow) {
        self.published.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_metrics(&self, _entry: &SharedWindow) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn metrics_publisher_bridges_lifecycle_events() {
    let registry = window_registry();
    let publisher = Arc::new(CountingPublisher::default());
    bind_to_registry(Arc::clone(&publisher), &registry);

    registry
        .compute_if_absent("backend-a", |_| Arc::new(FixedCallWindow::new(4).unwrap()))
        .unwrap();
    assert!(registry.replace("backend-a", Arc::new(FixedCallWindow::new(8).unwrap())).is_some());
    assert!(registry.remove("backend-a").is_some());

    // add -> publish; replace -> remove old + publish new; remove -> remove.
    assert_eq!(publisher.published.load(Ordering::SeqCst), 2);
    assert_eq!(publisher.removed.load(Ordering::SeqCst), 2);
}

#[test]
fn concurrent_compute_if_absent_yields_one_instance() {
    let registry = Arc::new(window_registry());
    let factory_calls = Arc::new(AtomicUsize::new(0));
    let added_events = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&added_events);
    registry.on_entry_added(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        let factory_calls = Arc::clone(&factory_calls);
        handles.push(std::thread::spawn(move || {
            registry
                .compute_if_absent("shared", |_| {
                    factory_calls.fetch_add(1, Ordering::SeqCst);
                    Arc::new(FixedCallWindow::new(4).unwrap())
                })
                .unwrap()
        }));
    }
    let windows: Vec<SharedWindow> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(factory_calls.load(Ordering::SeqCst), 1);
    assert_eq!(added_events.load(Ordering::SeqCst), 1);
    for window in &windows[1..] {
        assert!(Arc::ptr_eq(&windows[0], window));
    }
}
