//! `interpose demo`: Drive intercepted `App.Activity.onResume` calls.
//!
//! Each worker thread allocates its own activity and calls `onResume`
//! repeatedly. The handler counts its entries and calls through to the
//! original. In per-call mode every count matches the number of calls; in
//! class-wide mode concurrent windows race and the counts can drift.

use crate::output::StyledOutput;
use interpose_engine::{
    ClassDef, ClassRef, EntryStats, InterceptOptions, SwapMode, Value, Visibility, Vm, VmError,
    VmOptions,
};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const ACTIVITY: &str = "App.Activity";
const HANDLER: &str = "App.ActivityInvocationHandler";
const METHOD: &str = "onResume";
const DEMO_CALL_DEPTH: usize = 256;

/// Demo parameters
#[derive(Debug, Clone, Copy)]
pub struct DemoOptions {
    pub mode: SwapMode,
    pub threads: usize,
    pub calls: usize,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            mode: SwapMode::PerCall,
            threads: 4,
            calls: 1000,
        }
    }
}

/// What the demo observed
#[derive(Debug, Clone, Serialize)]
pub struct DemoReport {
    pub mode: SwapMode,
    pub threads: usize,
    pub calls_per_thread: usize,
    pub expected: usize,
    pub handler_entries: usize,
    pub original_runs: usize,
    pub errors: usize,
    /// Intercepted table installed and the slot still a trampoline
    pub armed: bool,
    pub stats: Vec<EntryStats>,
}

impl DemoReport {
    /// Every call went through the handler exactly once and reached the
    /// original exactly once
    pub fn is_exact(&self) -> bool {
        self.handler_entries == self.expected
            && self.original_runs == self.expected
            && self.errors == 0
            && self.armed
    }
}

#[derive(Default)]
struct Counters {
    handler_entries: AtomicUsize,
    original_runs: AtomicUsize,
}

fn build_vm(mode: SwapMode, counters: &Arc<Counters>) -> anyhow::Result<(Vm, ClassRef)> {
    let vm = Vm::with_options(VmOptions {
        intercept: InterceptOptions {
            swap_mode: mode,
            ..Default::default()
        },
        // racing class-wide windows can re-enter the handler repeatedly
        max_call_depth: DEMO_CALL_DEPTH,
    });

    let entries = counters.clone();
    vm.define_class(ClassDef::new(HANDLER).method(
        "invoke",
        Visibility::Public,
        move |engine, this, args| {
            entries.handler_entries.fetch_add(1, Ordering::Relaxed);
            let target = args
                .first()
                .and_then(Value::as_object)
                .cloned()
                .ok_or_else(|| VmError::TypeError("invoke: missing target".into()))?;
            let method = args
                .get(1)
                .and_then(Value::as_method)
                .cloned()
                .ok_or_else(|| VmError::TypeError("invoke: missing method".into()))?;
            engine.invoke_method(Some(this.class().as_ref()), &method, &target, &args[2..])
        },
    ))?;

    let runs = counters.clone();
    let activity = vm.define_class(
        ClassDef::new(ACTIVITY)
            .handler_field()
            .method(METHOD, Visibility::Protected, move |_, _, _| {
                runs.original_runs.fetch_add(1, Ordering::Relaxed);
                Ok(Value::Null)
            }),
    )?;

    Ok((vm, activity))
}

fn is_armed(vm: &Vm, activity: &ClassRef) -> bool {
    let Some(entry) = vm.interceptor().registry().lookup(activity, false) else {
        return false;
    };
    let Some(resolved) = entry.resolved() else {
        return false;
    };
    let trampoline = activity
        .slot_of(METHOD)
        .and_then(|slot| resolved.intercepted.get(slot))
        .is_some_and(|m| m.is_trampoline());
    Arc::ptr_eq(&activity.vtable(), &resolved.intercepted) && trampoline
}

/// Run the demo and collect the report
pub fn run(options: DemoOptions) -> anyhow::Result<DemoReport> {
    anyhow::ensure!(options.threads > 0, "--threads must be at least 1");

    let counters = Arc::new(Counters::default());
    let (vm, activity) = build_vm(options.mode, &counters)?;
    let errors = AtomicUsize::new(0);

    tracing::info!(
        mode = %options.mode,
        threads = options.threads,
        calls = options.calls,
        "starting demo"
    );

    thread::scope(|s| -> anyhow::Result<()> {
        let mut workers = Vec::with_capacity(options.threads);
        for _ in 0..options.threads {
            let object = vm.allocate(&activity)?;
            let (vm, errors) = (&vm, &errors);
            workers.push(s.spawn(move || {
                for _ in 0..options.calls {
                    if let Err(e) = vm.invoke_virtual(&object, METHOD, &[]) {
                        tracing::debug!(error = %e, "intercepted call failed");
                        errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }
        for worker in workers {
            if worker.join().is_err() {
                anyhow::bail!("demo worker panicked");
            }
        }
        Ok(())
    })?;

    Ok(DemoReport {
        mode: options.mode,
        threads: options.threads,
        calls_per_thread: options.calls,
        expected: options.threads * options.calls,
        handler_entries: counters.handler_entries.load(Ordering::Relaxed),
        original_runs: counters.original_runs.load(Ordering::Relaxed),
        errors: errors.load(Ordering::Relaxed),
        armed: is_armed(&vm, &activity),
        stats: vm.interceptor().stats(),
    })
}

pub fn execute(options: DemoOptions, json: bool, out: &mut StyledOutput) -> anyhow::Result<()> {
    let report = run(options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    out.bold(&format!(
        "{}.{} x {} thread(s) x {} call(s), {}",
        ACTIVITY, METHOD, report.threads, report.calls_per_thread, report.mode
    ));
    out.newline();
    out.field("expected", &report.expected.to_string());
    out.field("handler", &report.handler_entries.to_string());
    out.field("original", &report.original_runs.to_string());
    out.field("errors", &report.errors.to_string());
    out.field("final state", if report.armed { "ARMED" } else { "UNSWAPPED" });

    if report.is_exact() {
        out.success("exact");
    } else {
        out.warning("drift: concurrent class-wide windows raced");
    }
    out.newline();
    out.flush();
    Ok(())
}
