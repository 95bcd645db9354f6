//! Interception registry
//!
//! Holds one entry per row of the interception table. An entry's resolved
//! state (class, handler class, handler field offset, both dispatch tables)
//! is filled in exactly once, the first time its class is patched, and then
//! lives for the rest of the process.
//!
//! All registry consultations and mutations run under one lock, shared with
//! the call guard's swap steps.

use super::config::InterceptSpec;
use crate::vm::object::{Class, ClassRef, VTable};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// State resolved when an intercepted class is patched
#[derive(Debug)]
pub struct ResolvedEntry {
    /// The intercepted class
    pub class: ClassRef,
    /// Handler class instantiated per object
    pub handler_class: ClassRef,
    /// Offset of the handler field within an instance
    pub handler_offset: usize,
    /// Table with trampolines installed
    pub intercepted: Arc<VTable>,
    /// Table the class had before patching
    pub original: Arc<VTable>,
}

/// One registry entry per interception table row
#[derive(Debug)]
pub struct RegistryEntry {
    spec: InterceptSpec,
    resolved: OnceCell<ResolvedEntry>,
    /// Call guards currently between enter and leave
    open_windows: AtomicUsize,
    /// Completed intercepted calls
    calls: AtomicU64,
}

impl RegistryEntry {
    fn new(spec: InterceptSpec) -> Self {
        Self {
            spec,
            resolved: OnceCell::new(),
            open_windows: AtomicUsize::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// The table row this entry was built from
    pub fn spec(&self) -> &InterceptSpec {
        &self.spec
    }

    /// Resolved state, if the class has been patched
    pub fn resolved(&self) -> Option<&ResolvedEntry> {
        self.resolved.get()
    }

    /// Resolved state, if it was resolved for `class` or one of its
    /// superclasses
    ///
    /// Rows are keyed by descriptor name, so a registry shared between VMs
    /// can see a same-named class that it was never resolved for.
    pub fn resolved_for(&self, class: &Class) -> Option<&ResolvedEntry> {
        let resolved = self.resolved.get()?;
        class
            .lineage()
            .any(|c| std::ptr::eq(c, Arc::as_ptr(&resolved.class)))
            .then_some(resolved)
    }

    /// Check whether the class has been patched
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Record the resolved state. Returns false if it was already set.
    pub(crate) fn resolve(&self, resolved: ResolvedEntry) -> bool {
        self.resolved.set(resolved).is_ok()
    }

    /// Number of trampolines installed in the intercepted table
    pub fn trampoline_count(&self) -> usize {
        self.resolved().map_or(0, |r| {
            r.original
                .iter()
                .filter(|m| self.spec.intercepts(&m.name()))
                .count()
        })
    }

    /// Call guards currently open on this class
    pub fn open_windows(&self) -> usize {
        self.open_windows.load(Ordering::SeqCst)
    }

    /// Intercepted calls completed on this class
    pub fn intercepted_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub(crate) fn window_opened(&self) {
        self.open_windows.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn window_closed(&self) {
        self.open_windows.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Registry of intercepted classes
#[derive(Debug)]
pub struct InterceptRegistry {
    /// Entries in table order
    entries: Vec<Arc<RegistryEntry>>,
    /// Class descriptor to entry index
    by_class: FxHashMap<&'static str, usize>,
    /// Global interception lock
    lock: Mutex<()>,
}

impl InterceptRegistry {
    /// Build the registry from an interception table
    ///
    /// A class descriptor maps to at most one entry; later duplicate rows
    /// are ignored.
    pub fn new(specs: &'static [InterceptSpec]) -> Self {
        let mut entries = Vec::with_capacity(specs.len());
        let mut by_class = FxHashMap::default();

        for spec in specs {
            if by_class.contains_key(spec.class_name) {
                tracing::warn!(class = spec.class_name, "duplicate intercept row ignored");
                continue;
            }
            by_class.insert(spec.class_name, entries.len());
            entries.push(Arc::new(RegistryEntry::new(*spec)));
        }

        Self {
            entries,
            by_class,
            lock: Mutex::new(()),
        }
    }

    /// Registry over the compiled-in table
    pub fn builtin() -> Self {
        Self::new(super::config::BUILTIN_INTERCEPTS)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Find the entry for `class`
    ///
    /// With `recursive`, the superclass chain is walked and the first match
    /// wins, so subclasses of an intercepted class share its entry.
    pub fn lookup(&self, class: &Class, recursive: bool) -> Option<Arc<RegistryEntry>> {
        let _guard = self.lock.lock();
        let found = if recursive {
            class
                .lineage()
                .find_map(|c| self.by_class.get(c.name()))
        } else {
            self.by_class.get(class.name())
        };
        found.map(|&index| self.entries[index].clone())
    }

    /// Check whether `name` is some row's handler class descriptor
    pub fn is_handler_class_name(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.spec.handler_class == name)
    }

    /// All entries in table order
    pub fn entries(&self) -> &[Arc<RegistryEntry>] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
