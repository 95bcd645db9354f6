//! Per-instance handler binding, run from the allocation hook

use super::registry::InterceptRegistry;
use crate::vm::engine::Engine;
use crate::vm::object::ObjectRef;
use crate::vm::value::Value;
use crate::vm::VmResult;
use std::sync::Arc;

/// Attaches a fresh handler to each new instance of an intercepted class
#[derive(Debug)]
pub struct InstanceBinder {
    registry: Arc<InterceptRegistry>,
}

impl InstanceBinder {
    /// Create a binder over a registry
    pub fn new(registry: Arc<InterceptRegistry>) -> Self {
        Self { registry }
    }

    /// Bind a handler to a freshly allocated object
    ///
    /// Subclasses are matched through the superclass chain. Returns the bound
    /// handler, or `None` when the class is not intercepted or its patch was
    /// skipped.
    pub fn on_allocate(
        &self,
        engine: &dyn Engine,
        object: &ObjectRef,
    ) -> VmResult<Option<ObjectRef>> {
        let Some(entry) = self.registry.lookup(object.class(), true) else {
            return Ok(None);
        };
        let Some(resolved) = entry.resolved_for(object.class()) else {
            return Ok(None);
        };

        let handler = engine.allocate_instance(&resolved.handler_class)?;
        object.set_field(resolved.handler_offset, Value::Object(handler.clone()))?;
        tracing::trace!(
            class = object.class().name(),
            object = object.id(),
            handler = resolved.handler_class.name(),
            "handler bound"
        );
        Ok(Some(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::super::config::InterceptSpec;
    use super::super::InterceptOptions;
    use crate::vm::interpreter::{ClassDef, Vm, VmOptions};
    use crate::vm::object::Visibility;
    use crate::vm::value::Value;
    use std::sync::Arc;

    static SPECS: &[InterceptSpec] = &[InterceptSpec::new("B.Task", &["run"], "B.TaskHandler")];

    fn vm() -> Vm {
        let vm = Vm::with_options(VmOptions {
            intercept: InterceptOptions {
                specs: SPECS,
                ..Default::default()
            },
            ..Default::default()
        });
        vm.define_class(ClassDef::new("B.TaskHandler").method(
            "invoke",
            Visibility::Public,
            |_, _, _| Ok(Value::Null),
        ))
        .unwrap();
        vm
    }

    #[test]
    fn test_each_instance_gets_fresh_handler() {
        let vm = vm();
        let task = vm
            .define_class(ClassDef::new("B.Task").field("id", "I").handler_field())
            .unwrap();
        let a = vm.allocate(&task).unwrap();
        let b = vm.allocate(&task).unwrap();

        let ha = a.get_field(1).and_then(|v| v.as_object().cloned()).unwrap();
        let hb = b.get_field(1).and_then(|v| v.as_object().cloned()).unwrap();
        assert_eq!(ha.class().name(), "B.TaskHandler");
        assert!(!Arc::ptr_eq(&ha, &hb));
        // two tasks, two handlers
        assert_eq!(vm.allocation_count(), 4);
    }

    #[test]
    fn test_subclass_instances_are_bound() {
        let vm = vm();
        vm.define_class(ClassDef::new("B.Task").handler_field()).unwrap();
        let sub = vm
            .define_class(ClassDef::new("B.BatchTask").extends("B.Task"))
            .unwrap();
        let obj = vm.allocate(&sub).unwrap();

        let bound = vm.interceptor().on_allocate(&vm, &obj).unwrap().unwrap();
        assert_eq!(bound.class().name(), "B.TaskHandler");
        assert!(obj.get_field(0).unwrap().as_object().is_some());
    }

    #[test]
    fn test_unlisted_and_unresolved_classes_are_skipped() {
        let vm = vm();
        let plain = vm.define_class(ClassDef::new("B.Plain").handler_field()).unwrap();
        let obj = vm.allocate(&plain).unwrap();
        assert!(vm.interceptor().on_allocate(&vm, &obj).unwrap().is_none());
        assert!(obj.get_field(0).unwrap().is_null());

        // no handler field, so the patch was skipped
        let task = vm.define_class(ClassDef::new("B.Task")).unwrap();
        let obj = vm.allocate(&task).unwrap();
        assert!(vm.interceptor().on_allocate(&vm, &obj).unwrap().is_none());
    }
}
