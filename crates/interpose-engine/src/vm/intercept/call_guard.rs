//! Call guard around an intercepted call
//!
//! While a handler runs, a call through the intercepted slot must reach the
//! original body instead of re-entering the handler. A `CallGuard` opens
//! that window when constructed and closes it when dropped, so every exit
//! path (return, `?`, unwind) restores the armed state.
//!
//! Two strategies are available (see [`SwapMode`]):
//!
//! - **Per call**: the window is a (trampoline, receiver) key pushed on a
//!   thread-local stack. The trampoline entry point checks the stack and
//!   routes to the original. Nothing class-wide changes, so concurrent calls
//!   on other threads or other receivers stay intercepted.
//! - **Class wide**: under the interception lock, the class's table pointer
//!   is switched to the original table and the trampoline's content is
//!   overwritten with the original descriptor; leaving restores both. The
//!   state is shared by every instance of the class, so overlapping windows
//!   race (see [`SwapMode::ClassWide`]).

use super::accessor::is_proxy_instance;
use super::config::SwapMode;
use super::registry::{InterceptRegistry, RegistryEntry};
use crate::vm::engine::Engine;
use crate::vm::object::{MethodDesc, MethodRef, ObjectRef};
use std::cell::RefCell;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

thread_local! {
    /// Per-call windows open on this thread, innermost last
    static OPEN_WINDOWS: RefCell<Vec<WindowKey>> = const { RefCell::new(Vec::new()) };
}

/// Identity of one per-call window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowKey {
    trampoline: usize,
    receiver: usize,
}

impl WindowKey {
    fn new(trampoline: &MethodRef, receiver: &ObjectRef) -> Self {
        Self {
            trampoline: Arc::as_ptr(trampoline) as usize,
            receiver: Arc::as_ptr(receiver) as usize,
        }
    }
}

/// Check whether the current thread has a per-call window open for this
/// trampoline and receiver
pub(crate) fn in_window(trampoline: &MethodRef, receiver: &ObjectRef) -> bool {
    let key = WindowKey::new(trampoline, receiver);
    OPEN_WINDOWS.with(|windows| windows.borrow().contains(&key))
}

enum Window {
    /// Proxy instances and unresolved classes; nothing to undo
    Passthrough,
    PerCall {
        entry: Arc<RegistryEntry>,
        key: WindowKey,
    },
    ClassWide {
        entry: Arc<RegistryEntry>,
        /// Trampoline content as it was at enter
        token: Box<MethodDesc>,
    },
}

/// An open interception window; dropping it closes the window
#[must_use = "dropping the guard closes the window immediately"]
pub struct CallGuard {
    registry: Arc<InterceptRegistry>,
    trampoline: MethodRef,
    receiver: ObjectRef,
    window: Window,
}

impl CallGuard {
    /// Open a window for a call on `object` through `trampoline`
    pub fn enter(
        registry: &Arc<InterceptRegistry>,
        mode: SwapMode,
        engine: &dyn Engine,
        object: &ObjectRef,
        trampoline: &MethodRef,
    ) -> Self {
        let window = if is_proxy_instance(engine, object) {
            Window::Passthrough
        } else {
            match registry.lookup(object.class(), true) {
                Some(entry) if entry.resolved_for(object.class()).is_some() => match mode {
                    SwapMode::PerCall => open_per_call(entry, object, trampoline),
                    SwapMode::ClassWide => open_class_wide(registry, entry, trampoline),
                },
                _ => Window::Passthrough,
            }
        };

        Self {
            registry: registry.clone(),
            trampoline: trampoline.clone(),
            receiver: object.clone(),
            window,
        }
    }

    /// Check whether this guard changed nothing
    pub fn is_passthrough(&self) -> bool {
        matches!(self.window, Window::Passthrough)
    }

    /// Close the window
    pub fn leave(self) {
        drop(self)
    }
}

fn open_per_call(entry: Arc<RegistryEntry>, object: &ObjectRef, trampoline: &MethodRef) -> Window {
    let key = WindowKey::new(trampoline, object);
    OPEN_WINDOWS.with(|windows| windows.borrow_mut().push(key));
    entry.window_opened();
    tracing::trace!(object = object.id(), method = %trampoline.name(), "window opened");
    Window::PerCall { entry, key }
}

fn open_class_wide(
    registry: &InterceptRegistry,
    entry: Arc<RegistryEntry>,
    trampoline: &MethodRef,
) -> Window {
    let Some(resolved) = entry.resolved() else {
        return Window::Passthrough;
    };

    let token = {
        let _guard = registry.lock();
        fence(Ordering::SeqCst);
        let token = Box::new(trampoline.content());
        resolved.class.install_vtable(resolved.original.clone());
        // Taken from the recorded original table, not from the trampoline, whose
        // content may already be swapped by an overlapping window.
        if let Some(original) = resolved.original.get(token.slot) {
            trampoline.overwrite(original.content());
        }
        fence(Ordering::SeqCst);
        token
    };

    entry.window_opened();
    tracing::trace!(class = resolved.class.name(), method = %token.name, "class unswapped");
    Window::ClassWide { entry, token }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.window, Window::Passthrough) {
            Window::Passthrough => {}
            Window::PerCall { entry, key } => {
                OPEN_WINDOWS.with(|windows| {
                    let mut windows = windows.borrow_mut();
                    if let Some(pos) = windows.iter().rposition(|k| *k == key) {
                        windows.remove(pos);
                    }
                });
                entry.window_closed();
                tracing::trace!(object = self.receiver.id(), "window closed");
            }
            Window::ClassWide { entry, token } => {
                if let Some(resolved) = entry.resolved() {
                    let _guard = self.registry.lock();
                    fence(Ordering::SeqCst);
                    resolved.class.install_vtable(resolved.intercepted.clone());
                    self.trampoline.overwrite(*token);
                    fence(Ordering::SeqCst);
                }
                entry.window_closed();
                tracing::trace!(object = self.receiver.id(), "class re-armed");
            }
        }
    }
}
