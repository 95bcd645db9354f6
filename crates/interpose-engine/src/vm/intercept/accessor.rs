//! Handler lookup for a bound instance

use super::registry::InterceptRegistry;
use crate::vm::engine::Engine;
use crate::vm::object::ObjectRef;
use std::sync::Arc;

/// Resolves the handler object bound to an instance
#[derive(Debug)]
pub struct HandlerAccessor {
    registry: Arc<InterceptRegistry>,
}

impl HandlerAccessor {
    /// Create an accessor over a registry
    pub fn new(registry: Arc<InterceptRegistry>) -> Self {
        Self { registry }
    }

    /// Get the handler bound to `object`
    ///
    /// Direct subclasses of the dynamic-proxy base type keep their handler in
    /// that type's own field. `None` is a normal answer for objects that are
    /// not intercepted.
    pub fn get_handler(&self, engine: &dyn Engine, object: &ObjectRef) -> Option<ObjectRef> {
        if is_proxy_instance(engine, object) {
            return object
                .get_field(engine.proxy_handler_offset())
                .and_then(|v| v.as_object().cloned());
        }

        let entry = self.registry.lookup(object.class(), true)?;
        let resolved = entry.resolved_for(object.class())?;
        object
            .get_field(resolved.handler_offset)
            .and_then(|v| v.as_object().cloned())
    }
}

/// Check whether `object`'s class extends the dynamic-proxy base type
pub(crate) fn is_proxy_instance(engine: &dyn Engine, object: &ObjectRef) -> bool {
    object
        .class()
        .super_class()
        .is_some_and(|s| Arc::ptr_eq(s, engine.proxy_class()))
}
