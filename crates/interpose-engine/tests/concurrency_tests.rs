//! Concurrent Interception Tests
//!
//! Intercepted calls on many threads in per-call mode: every call enters its
//! handler exactly once and reaches the original exactly once, and the class
//! ends ARMED with no open windows.
//!
//! # Running Tests
//! ```bash
//! cargo test --test concurrency_tests
//! ```

use interpose_engine::{ClassDef, SwapMode, Value, Visibility, Vm, VmError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;
const CALLS: usize = 200;

struct Counters {
    handler_entries: AtomicUsize,
    original_runs: AtomicUsize,
}

fn setup() -> (Vm, Arc<Counters>) {
    let vm = Vm::new();
    assert_eq!(vm.interceptor().swap_mode(), SwapMode::PerCall);
    let counters = Arc::new(Counters {
        handler_entries: AtomicUsize::new(0),
        original_runs: AtomicUsize::new(0),
    });

    let entries = counters.clone();
    vm.define_class(ClassDef::new("App.ActivityInvocationHandler").method(
        "invoke",
        Visibility::Public,
        move |engine, this, args| {
            entries.handler_entries.fetch_add(1, Ordering::Relaxed);
            let target = args[0]
                .as_object()
                .cloned()
                .ok_or_else(|| VmError::TypeError("target".into()))?;
            let method = args[1]
                .as_method()
                .cloned()
                .ok_or_else(|| VmError::TypeError("method".into()))?;
            engine.invoke_method(Some(this.class().as_ref()), &method, &target, &args[2..])
        },
    ))
    .unwrap();

    let runs = counters.clone();
    vm.define_class(
        ClassDef::new("App.Activity")
            .handler_field()
            .method("onResume", Visibility::Protected, move |_, _, _| {
                runs.original_runs.fetch_add(1, Ordering::Relaxed);
                Ok(Value::Null)
            }),
    )
    .unwrap();

    (vm, counters)
}

#[test]
fn test_concurrent_calls_on_distinct_instances() {
    let (vm, counters) = setup();
    let activity = vm.find_class("App.Activity").unwrap();

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let obj = vm.allocate(&activity).unwrap();
                for _ in 0..CALLS {
                    vm.invoke_virtual(&obj, "onResume", &[]).unwrap();
                }
            });
        }
    });

    let total = THREADS * CALLS;
    assert_eq!(counters.handler_entries.load(Ordering::Relaxed), total);
    assert_eq!(counters.original_runs.load(Ordering::Relaxed), total);

    let entry = vm.interceptor().registry().lookup(&activity, false).unwrap();
    let resolved = entry.resolved().unwrap();
    assert_eq!(entry.open_windows(), 0);
    assert_eq!(entry.intercepted_calls(), total as u64);
    assert!(Arc::ptr_eq(&activity.vtable(), &resolved.intercepted));
    assert!(activity
        .method_at(activity.slot_of("onResume").unwrap())
        .unwrap()
        .is_trampoline());
}

#[test]
fn test_concurrent_calls_on_shared_instance() {
    let (vm, counters) = setup();
    let activity = vm.find_class("App.Activity").unwrap();
    let obj = vm.allocate(&activity).unwrap();

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..CALLS {
                    vm.invoke_virtual(&obj, "onResume", &[]).unwrap();
                }
            });
        }
    });

    let total = THREADS * CALLS;
    assert_eq!(counters.handler_entries.load(Ordering::Relaxed), total);
    assert_eq!(counters.original_runs.load(Ordering::Relaxed), total);
}

#[test]
fn test_concurrent_subclass_definition() {
    let (vm, counters) = setup();

    thread::scope(|s| {
        for i in 0..THREADS {
            let vm = &vm;
            s.spawn(move || {
                let sub = vm
                    .define_class(ClassDef::new(format!("App.Sub{}", i)).extends("App.Activity"))
                    .unwrap();
                let obj = vm.allocate(&sub).unwrap();
                assert!(vm.interceptor().get_handler(vm, &obj).is_some());
                vm.invoke_virtual(&obj, "onResume", &[]).unwrap();
            });
        }
    });

    // built-ins, handler, activity and one subclass per thread
    assert_eq!(vm.class_count(), 4 + THREADS);
    assert_eq!(counters.handler_entries.load(Ordering::Relaxed), THREADS);
    assert_eq!(counters.original_runs.load(Ordering::Relaxed), THREADS);
}
