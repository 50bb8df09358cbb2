//! End-to-end change propagation through the service.

use hotswap_bindings::binding::{DynValue, STANDALONE_GROUP};
use hotswap_bindings::error::GroupPhase;
use hotswap_bindings::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

fn source(pairs: &[(&str, i64)]) -> Arc<dyn ConfigurationSource> {
    let mut builder = TreeSource::builder();
    for (key, value) in pairs {
        builder = builder.set(*key, *value);
    }
    Arc::new(builder.build().unwrap())
}

#[derive(Default)]
struct CountingInterceptor {
    created: AtomicUsize,
    released: AtomicUsize,
}

impl DeltaValueInterceptor for CountingInterceptor {
    fn created(&self, value: DynValue) -> DynValue {
        self.created.fetch_add(1, Ordering::SeqCst);
        value
    }

    fn released(&self, _value: DynValue) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl CountingInterceptor {
    fn counts(&self) -> (usize, usize) {
        (
            self.created.load(Ordering::SeqCst),
            self.released.load(Ordering::SeqCst),
        )
    }
}

#[test]
fn test_group_scenario() {
    let initial = TreeSource::builder()
        .set("x", 1i64)
        .set("y", "v")
        .build()
        .unwrap();
    let service = DeltaService::builder()
        .with_source(Arc::new(initial))
        .build();

    let events = Arc::new(Mutex::new(Vec::<String>::new()));

    let log = Arc::clone(&events);
    let a = ValueDefinition::<i64>::new("/x", move |new: Arc<i64>, old: Option<Arc<i64>>| {
        log.lock().push(format!("a({}, {:?})", new, old.map(|v| *v)));
        Ok(())
    });
    let log = Arc::clone(&events);
    let b = ValueDefinition::<String>::new("/y", move |new: Arc<String>, old: Option<Arc<String>>| {
        log.lock().push(format!("b({}, {:?})", new, old.map(|v| v.to_string())));
        Ok(())
    });
    let log = Arc::clone(&events);
    let group = ValueDefinitionGroup::builder("G")
        .value(&a)
        .value(&b)
        .on_change(move |_source| {
            log.lock().push("G".to_string());
            Ok(())
        })
        .build();

    service.register_group(group, true).unwrap();
    assert_eq!(
        *events.lock(),
        vec!["a(1, None)", "b(v, None)", "G"]
    );

    events.lock().clear();
    let updated = TreeSource::builder()
        .set("x", 2i64)
        .set("y", "v")
        .build()
        .unwrap();
    service.refresh(Arc::new(updated)).unwrap();

    assert_eq!(
        *events.lock(),
        vec!["a(2, Some(1))", "b(v, Some(\"v\"))", "G"]
    );
}

#[test]
fn test_discovery_failure_changes_nothing() {
    let service = DeltaService::builder()
        .with_source(source(&[("a", 1), ("b", 1), ("c", 1)]))
        .build();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let make = |name: &'static str, expression: &str| {
        let seen = Arc::clone(&seen);
        ValueDefinition::<i64>::new(expression, move |new: Arc<i64>, _| {
            seen.lock().push((name, *new));
            Ok(())
        })
    };

    let good = ValueDefinitionGroup::builder("good").value(&make("good", "a")).build();
    let bad_b = ValueDefinitionGroup::builder("needs-b").value(&make("b", "b")).build();
    let bad_c = ValueDefinitionGroup::builder("needs-c").value(&make("c", "c")).build();
    service.register_group(good, true).unwrap();
    service.register_group(bad_b, true).unwrap();
    service.register_group(bad_c, true).unwrap();
    seen.lock().clear();

    let before = service.active_source();
    let err = service.refresh(source(&[("a", 2)])).unwrap_err();

    let refresh = err.as_refresh().unwrap();
    assert_eq!(refresh.phase, RefreshPhase::Discovery);
    assert_eq!(refresh.failed_groups(), vec!["needs-b", "needs-c"]);
    assert!(seen.lock().is_empty());
    assert!(Arc::ptr_eq(&before, &service.active_source()));
    assert_eq!(service.retrieve::<i64>("a").unwrap(), 1);
}

#[test]
fn test_created_released_pairing() {
    let interceptor = Arc::new(CountingInterceptor::default());
    let service = DeltaService::builder()
        .with_source(source(&[("x", 0)]))
        .with_interceptor(interceptor.clone())
        .build();

    let definition = ValueDefinition::<i64>::new("x", |_, _| Ok(()));
    service.register(&definition, true).unwrap();

    let refreshes = 5;
    for n in 1..=refreshes {
        service.refresh(source(&[("x", n)])).unwrap();
    }

    // One value from registration plus one per refresh
    let committed = refreshes as usize + 1;
    assert_eq!(interceptor.counts(), (committed, committed - 1));
    assert_eq!(service.tracked_value_count(), 1);

    assert!(service.unregister(&definition));
    assert_eq!(interceptor.counts(), (committed, committed));
}

#[test]
fn test_rejected_value_is_released() {
    let interceptor = Arc::new(CountingInterceptor::default());
    let service = DeltaService::builder()
        .with_source(source(&[("x", 1)]))
        .with_interceptor(interceptor.clone())
        .build();

    let definition = ValueDefinition::<i64>::new("x", |new: Arc<i64>, _| {
        if *new > 1 {
            return Err("too large".into());
        }
        Ok(())
    });
    service.register(&definition, true).unwrap();

    let err = service.refresh(source(&[("x", 2)])).unwrap_err();
    assert_eq!(err.as_refresh().unwrap().phase, RefreshPhase::Commit);

    // The refused value was released, the accepted one is still tracked
    assert_eq!(interceptor.counts(), (2, 1));
    assert_eq!(service.tracked_value_count(), 1);

    service.shutdown();
    assert_eq!(interceptor.counts(), (2, 2));
}

#[test]
fn test_expired_registration_is_swept_silently() {
    let service = DeltaService::builder()
        .with_source(source(&[("x", 1)]))
        .build();

    let expired = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&expired);
    let counter = Arc::clone(&calls);
    let definition = ValueDefinition::<i64>::new("x", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .expires_with(Arc::new(move || flag.load(Ordering::SeqCst)));

    service.register(&definition, true).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    expired.store(true, Ordering::SeqCst);
    // Would fail discovery if the registration were still there
    service.refresh(source(&[])).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.binding_count(), 0);
    assert!(!service.unregister(&definition));
}

#[test]
fn test_weak_target_registration() {
    struct Cache {
        size: AtomicUsize,
    }

    let service = DeltaService::builder()
        .with_source(source(&[("cache.size", 10)]))
        .build();
    let cache = Arc::new(Cache {
        size: AtomicUsize::new(0),
    });

    let definition = ValueDefinition::<usize>::weak("cache.size", &cache, |cache, size| {
        cache.size.store(*size, Ordering::SeqCst);
        Ok(())
    });
    service.register(&definition, true).unwrap();
    assert_eq!(cache.size.load(Ordering::SeqCst), 10);

    service.refresh(source(&[("cache.size", 20)])).unwrap();
    assert_eq!(cache.size.load(Ordering::SeqCst), 20);

    drop(cache);
    service.refresh(source(&[("cache.size", 30)])).unwrap();
    assert_eq!(service.binding_count(), 0);
}

#[test]
fn test_partial_commit_is_not_rolled_back() {
    let service = DeltaService::builder()
        .with_source(source(&[("x", 1)]))
        .build();

    let first = Arc::new(Mutex::new(0i64));
    let target = Arc::clone(&first);
    let healthy = ValueDefinitionGroup::builder("healthy")
        .value(&ValueDefinition::<i64>::new("x", move |new: Arc<i64>, _| {
            *target.lock() = *new;
            Ok(())
        }))
        .build();
    let fragile = ValueDefinitionGroup::builder("fragile")
        .value(&ValueDefinition::<i64>::new("x", |_, _| Ok(())))
        .on_change(|source: &dyn ConfigurationSource| {
            if source.is_available(&Query::from("x")) && source.retrieve(&Query::from("x"))?.into_int()? > 1 {
                return Err("refusing".into());
            }
            Ok(())
        })
        .build();

    service.register_group(healthy, true).unwrap();
    service.register_group(fragile, true).unwrap();

    let before = service.active_source();
    let err = service.refresh(source(&[("x", 2)])).unwrap_err();
    let refresh = err.as_refresh().unwrap();

    assert_eq!(refresh.phase, RefreshPhase::Commit);
    assert_eq!(refresh.failed_groups(), vec!["fragile"]);
    assert_eq!(refresh.group_errors[0].phase(), GroupPhase::ListenerInvocation);
    // The healthy group already saw the new value
    assert_eq!(*first.lock(), 2);
    // But the active source was not swapped
    assert!(Arc::ptr_eq(&before, &service.active_source()));
}

#[test]
fn test_panicking_listener_is_contained() {
    let service = DeltaService::builder()
        .with_source(source(&[("x", 1)]))
        .build();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let panicking = ValueDefinition::<i64>::new("x", |new: Arc<i64>, _| {
        if *new == 2 {
            panic!("cannot handle two");
        }
        Ok(())
    });
    let after = ValueDefinition::<i64>::new("x", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let group = ValueDefinitionGroup::builder("g")
        .value(&panicking)
        .value(&after)
        .build();
    service.register_group(group, true).unwrap();

    let err = service.refresh(source(&[("x", 2)])).unwrap_err();
    assert_eq!(err.as_refresh().unwrap().phase, RefreshPhase::Commit);
    // The value after the panicking one was still committed
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_list_type_and_converter_bindings() {
    #[derive(Debug, PartialEq)]
    struct Endpoint(String);

    let initial = TreeSource::builder()
        .set("hosts", vec!["a", "b"])
        .set("timeout_ms", 250i64)
        .set("primary", "db-1")
        .bind_type::<String>("primary")
        .build()
        .unwrap();

    let service = DeltaService::builder()
        .with_source(Arc::new(initial))
        .with_converter(|value: config::Value| Ok(Duration::from_millis(value.into_int()? as u64)))
        .with_converter(|value: config::Value| Ok(Endpoint(value.into_string()?)))
        .build();

    let hosts = Arc::new(Mutex::new(Vec::new()));
    let timeout = Arc::new(Mutex::new(Duration::ZERO));
    let endpoint = Arc::new(Mutex::new(None));
    let primary = Arc::new(Mutex::new(String::new()));

    let sink = Arc::clone(&hosts);
    let list = ValueDefinition::<Vec<String>>::list("hosts", move |new: Arc<Vec<String>>, _| {
        *sink.lock() = (*new).clone();
        Ok(())
    });
    let sink = Arc::clone(&timeout);
    let duration = ValueDefinition::<Duration>::custom("timeout_ms", move |new: Arc<Duration>, _| {
        *sink.lock() = *new;
        Ok(())
    });
    let sink = Arc::clone(&endpoint);
    let custom = ValueDefinition::<Endpoint>::custom("primary", move |new: Arc<Endpoint>, _| {
        *sink.lock() = Some(new.0.clone());
        Ok(())
    });
    let sink = Arc::clone(&primary);
    let by_type = ValueDefinition::<String>::of_type(move |new: Arc<String>, _| {
        *sink.lock() = new.to_string();
        Ok(())
    });

    let group = ValueDefinitionGroup::builder("mixed")
        .value(&list)
        .value(&duration)
        .value(&custom)
        .value(&by_type)
        .build();
    service.register_group(group, true).unwrap();

    assert_eq!(*hosts.lock(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(*timeout.lock(), Duration::from_millis(250));
    assert_eq!(endpoint.lock().as_deref(), Some("db-1"));
    assert_eq!(*primary.lock(), "db-1");
}

#[test]
fn test_standalone_group_processed_first() {
    let service = DeltaService::builder()
        .with_source(source(&[("x", 1)]))
        .build();
    let order = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&order);
    let grouped = ValueDefinitionGroup::builder("grouped")
        .value(&ValueDefinition::<i64>::new("x", move |_, _| {
            log.lock().push("grouped");
            Ok(())
        }))
        .build();
    service.register_group(grouped, false).unwrap();

    let log = Arc::clone(&order);
    let standalone = ValueDefinition::<i64>::new("x", move |_, _| {
        log.lock().push(STANDALONE_GROUP);
        Ok(())
    });
    service.register(&standalone, false).unwrap();

    service.refresh(source(&[("x", 2)])).unwrap();
    assert_eq!(*order.lock(), vec![STANDALONE_GROUP, "grouped"]);
}

/// Counts like [`CountingInterceptor`] and panics in its first `released` call.
#[derive(Default)]
struct FlakyInterceptor {
    counts: CountingInterceptor,
    released_values: Mutex<Vec<i64>>,
    panicked: AtomicBool,
}

impl DeltaValueInterceptor for FlakyInterceptor {
    fn created(&self, value: DynValue) -> DynValue {
        self.counts.created(value)
    }

    fn released(&self, value: DynValue) {
        if let Some(v) = value.downcast_ref::<i64>() {
            self.released_values.lock().push(*v);
        }
        self.counts.released(value);
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("release hook failed");
        }
    }
}

#[test]
fn test_interceptor_panic_does_not_escape_refresh() {
    let interceptor = Arc::new(FlakyInterceptor::default());
    let service = DeltaService::builder()
        .with_source(source(&[("x", 1)]))
        .with_interceptor(interceptor.clone())
        .build();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let definition = ValueDefinition::<i64>::new("x", move |new: Arc<i64>, old: Option<Arc<i64>>| {
        log.lock().push((*new, old.map(|v| *v)));
        Ok(())
    });
    service.register(&definition, true).unwrap();

    // Releasing 1 panics inside the hook
    service.refresh(source(&[("x", 2)])).unwrap();
    assert_eq!(service.tracked_value_count(), 1);

    service.refresh(source(&[("x", 3)])).unwrap();
    assert_eq!(*seen.lock(), vec![(1, None), (2, Some(1)), (3, Some(2))]);

    service.shutdown();
    assert_eq!(interceptor.counts.counts(), (3, 3));
    assert_eq!(*interceptor.released_values.lock(), vec![1, 2, 3]);
}

#[test]
fn test_unregister_group_releases_tracked_values() {
    let interceptor = Arc::new(CountingInterceptor::default());
    let service = DeltaService::builder()
        .with_source(source(&[("x", 1), ("y", 2)]))
        .with_interceptor(interceptor.clone())
        .build();

    let group = ValueDefinitionGroup::builder("pair")
        .value(&ValueDefinition::<i64>::new("x", |_, _| Ok(())))
        .value(&ValueDefinition::<i64>::new("y", |_, _| Ok(())))
        .build();
    let id = service.register_group(group, true).unwrap();
    service.refresh(source(&[("x", 3), ("y", 4)])).unwrap();
    assert_eq!(interceptor.counts(), (4, 2));
    assert_eq!(service.tracked_value_count(), 2);

    assert!(service.unregister_group(id).unwrap());
    assert_eq!(interceptor.counts(), (4, 4));
    assert_eq!(service.tracked_value_count(), 0);
    assert_eq!(service.group_count(), 0);
    assert_eq!(service.binding_count(), 0);

    assert!(!service.unregister_group(id).unwrap());
    assert_eq!(interceptor.counts(), (4, 4));
}

#[test]
fn test_registration_already_expired_is_swept_on_refresh() {
    let service = DeltaService::builder()
        .with_source(source(&[("x", 1)]))
        .build();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let definition = ValueDefinition::<i64>::new("x", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .expires_with(Arc::new(|| true));

    service.register(&definition, false).unwrap();
    assert_eq!(service.binding_count(), 1);

    service.refresh(source(&[("x", 2)])).unwrap();
    assert_eq!(service.binding_count(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
