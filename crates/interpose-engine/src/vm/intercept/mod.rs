//! Method interception
//!
//! Selected virtual methods of selected classes are redirected, without
//! touching method bodies, to a per-instance handler object:
//!
//! 1. **Patch** (class initialization): a class with its own table row gets
//!    a new dispatch table in which the listed methods are trampolines.
//! 2. **Bind** (allocation): each instance of an intercepted class, or of a
//!    subclass, gets a fresh handler stored in its handler field.
//! 3. **Dispatch**: a call that lands on a trampoline opens a [`CallGuard`]
//!    window and invokes the handler's `invoke(target, method, args...)`.
//!    Inside the window, calls through the same slot reach the original.
//!
//! ## Handler calling convention
//!
//! ```rust,ignore
//! |engine, handler, args| {
//!     let target = args[0].as_object().cloned().unwrap();
//!     let method = args[1].as_method().cloned().unwrap();
//!     // call through to the original
//!     engine.invoke_method(Some(handler.class().as_ref()), &method, &target, &args[2..])
//! }
//! ```

mod access_gate;
mod accessor;
mod binder;
mod call_guard;
mod config;
mod patcher;
mod registry;

pub use access_gate::AccessGate;
pub use accessor::HandlerAccessor;
pub use binder::InstanceBinder;
pub use call_guard::CallGuard;
pub use config::{
    InterceptOptions, InterceptSpec, SwapMode, BUILTIN_INTERCEPTS, HANDLER_FIELD_DESCRIPTOR,
    HANDLER_FIELD_NAME, HANDLER_INVOKE_METHOD,
};
pub use patcher::{ClassPatcher, PatchOutcome, ResolveError};
pub use registry::{InterceptRegistry, RegistryEntry, ResolvedEntry};

use crate::vm::engine::Engine;
use crate::vm::object::{Class, ClassRef, MethodRef, ObjectRef};
use crate::vm::value::Value;
use crate::vm::VmResult;
use serde::Serialize;
use std::sync::Arc;

/// Snapshot of one registry entry
#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
    /// Intercepted class descriptor
    pub class: &'static str,
    /// Handler class descriptor
    pub handler: &'static str,
    /// Intercepted method names
    pub methods: &'static [&'static str],
    /// Whether the class has been patched
    pub resolved: bool,
    /// Trampoline slots installed
    pub trampolines: usize,
    /// Windows currently open
    pub open_windows: usize,
    /// Completed intercepted calls
    pub calls: u64,
}

/// The interception core, wired to one registry
///
/// The host calls [`patch`](Self::patch) from class initialization,
/// [`on_allocate`](Self::on_allocate) from allocation, and
/// [`invoke_trampoline`](Self::invoke_trampoline) when dispatch reaches a
/// trampoline descriptor.
#[derive(Debug)]
pub struct Interceptor {
    registry: Arc<InterceptRegistry>,
    patcher: ClassPatcher,
    binder: InstanceBinder,
    accessor: HandlerAccessor,
    gate: AccessGate,
    swap_mode: SwapMode,
}

impl Interceptor {
    /// Build the interception core from options
    pub fn new(options: InterceptOptions) -> Self {
        Self::with_registry(Arc::new(InterceptRegistry::new(options.specs)), options.swap_mode)
    }

    /// Build the interception core over an existing registry
    pub fn with_registry(registry: Arc<InterceptRegistry>, swap_mode: SwapMode) -> Self {
        Self {
            patcher: ClassPatcher::new(registry.clone()),
            binder: InstanceBinder::new(registry.clone()),
            accessor: HandlerAccessor::new(registry.clone()),
            gate: AccessGate::new(registry.clone()),
            registry,
            swap_mode,
        }
    }

    /// The shared registry
    pub fn registry(&self) -> &Arc<InterceptRegistry> {
        &self.registry
    }

    /// Call guard strategy in use
    pub fn swap_mode(&self) -> SwapMode {
        self.swap_mode
    }

    /// Class-initialization hook
    pub fn patch(&self, engine: &dyn Engine, class: &ClassRef) -> PatchOutcome {
        self.patcher.patch(engine, class)
    }

    /// Allocation hook
    pub fn on_allocate(
        &self,
        engine: &dyn Engine,
        object: &ObjectRef,
    ) -> VmResult<Option<ObjectRef>> {
        self.binder.on_allocate(engine, object)
    }

    /// Handler bound to `object`, if any
    pub fn get_handler(&self, engine: &dyn Engine, object: &ObjectRef) -> Option<ObjectRef> {
        self.accessor.get_handler(engine, object)
    }

    /// Access-check hook
    pub fn is_interceptor_handler_class(&self, class: &Class) -> bool {
        self.gate.is_interceptor_handler_class(class)
    }

    /// Open a call guard window for `object` through `trampoline`
    pub fn enter(&self, engine: &dyn Engine, object: &ObjectRef, trampoline: &MethodRef) -> CallGuard {
        CallGuard::enter(&self.registry, self.swap_mode, engine, object, trampoline)
    }

    /// Interception entry point, reached when dispatch lands on a trampoline
    pub fn invoke_trampoline(
        &self,
        engine: &dyn Engine,
        this: &ObjectRef,
        trampoline: &MethodRef,
        args: &[Value],
    ) -> VmResult<Value> {
        let desc = trampoline.content();
        let Some(original) = desc.original().cloned() else {
            // swapped to the original body by a class-wide window
            return engine.execute(trampoline, this, args);
        };

        if self.swap_mode == SwapMode::PerCall && call_guard::in_window(trampoline, this) {
            return engine.execute(&original, this, args);
        }

        let Some(handler) = self.get_handler(engine, this) else {
            tracing::warn!(
                class = this.class().name(),
                method = %desc.name,
                "intercepted object has no handler, calling original"
            );
            return engine.execute(&original, this, args);
        };

        let mut call_args = Vec::with_capacity(args.len() + 2);
        call_args.push(Value::Object(this.clone()));
        call_args.push(Value::Method(trampoline.clone()));
        call_args.extend_from_slice(args);

        let guard = self.enter(engine, this, trampoline);
        let result = engine.invoke_virtual(&handler, HANDLER_INVOKE_METHOD, &call_args);
        guard.leave();
        result
    }

    /// Per-entry statistics in table order
    pub fn stats(&self) -> Vec<EntryStats> {
        self.registry
            .entries()
            .iter()
            .map(|entry| {
                let spec = entry.spec();
                EntryStats {
                    class: spec.class_name,
                    handler: spec.handler_class,
                    methods: spec.methods,
                    resolved: entry.is_resolved(),
                    trampolines: entry.trampoline_count(),
                    open_windows: entry.open_windows(),
                    calls: entry.intercepted_calls(),
                }
            })
            .collect()
    }
}

impl Default for Interceptor {
    fn default() -> Self {
        Self::new(InterceptOptions::default())
    }
}
