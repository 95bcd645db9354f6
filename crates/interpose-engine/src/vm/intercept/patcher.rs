//! Class patching
//!
//! Runs from the class-initialization hook. For a class with its own row in
//! the interception table, a replacement dispatch table is built from the
//! class's scope: intercepted slots get a fresh trampoline descriptor that
//! remembers the original, every other slot gets a verbatim copy of the
//! original descriptor. The copy means the class never executes out of its
//! original table once patched.
//!
//! Resolution failures are soft: the class stays unpatched and fully usable.

use super::config::{HANDLER_FIELD_DESCRIPTOR, HANDLER_FIELD_NAME};
use super::registry::{InterceptRegistry, ResolvedEntry};
use crate::vm::engine::Engine;
use crate::vm::object::{ClassRef, Code, MethodDesc, MethodRef};
use std::sync::Arc;
use thiserror::Error;

/// Why an intercepted class could not be patched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The row's handler class is not defined
    #[error("handler class {0} not found")]
    HandlerClassNotFound(String),

    /// The row was already resolved for a different class of the same name
    #[error("row for {0} is already bound to another class")]
    BoundToOtherClass(String),

    /// The intercepted class lacks the handler field
    #[error("class {class} has no field {field}: {descriptor}")]
    HandlerFieldMissing {
        /// Intercepted class descriptor
        class: String,
        /// Expected field name
        field: &'static str,
        /// Expected field type
        descriptor: &'static str,
    },
}

/// What `patch` did with a class
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// No row names this class; untouched
    NotIntercepted,
    /// Already patched by an earlier call; untouched
    AlreadyPatched,
    /// Resolution failed; the class keeps its original table
    Skipped(ResolveError),
    /// A new table was installed
    Patched {
        /// Number of trampoline slots
        trampolines: usize,
    },
}

impl PatchOutcome {
    /// Check whether this call installed a table
    pub fn is_patched(&self) -> bool {
        matches!(self, PatchOutcome::Patched { .. })
    }
}

/// Builds and installs intercepted dispatch tables
#[derive(Debug)]
pub struct ClassPatcher {
    registry: Arc<InterceptRegistry>,
}

impl ClassPatcher {
    /// Create a patcher over a registry
    pub fn new(registry: Arc<InterceptRegistry>) -> Self {
        Self { registry }
    }

    /// Patch `class` if it has its own row in the interception table
    ///
    /// Must run before the class is published as initialized.
    pub fn patch(&self, engine: &dyn Engine, class: &ClassRef) -> PatchOutcome {
        let Some(entry) = self.registry.lookup(class, false) else {
            return PatchOutcome::NotIntercepted;
        };

        let _guard = self.registry.lock();
        if entry.resolved_for(class).is_some() {
            return PatchOutcome::AlreadyPatched;
        }
        if entry.is_resolved() {
            let err = ResolveError::BoundToOtherClass(class.name().to_string());
            tracing::error!(class = class.name(), error = %err, "intercept resolution failed");
            return PatchOutcome::Skipped(err);
        }

        let spec = entry.spec();
        let handler_class = match engine.find_class(spec.handler_class) {
            Some(handler_class) => handler_class,
            None => {
                let err = ResolveError::HandlerClassNotFound(spec.handler_class.to_string());
                tracing::error!(class = class.name(), error = %err, "intercept resolution failed");
                return PatchOutcome::Skipped(err);
            }
        };
        let handler_offset =
            match engine.find_field_offset(class, HANDLER_FIELD_NAME, HANDLER_FIELD_DESCRIPTOR) {
                Some(offset) => offset,
                None => {
                    let err = ResolveError::HandlerFieldMissing {
                        class: class.name().to_string(),
                        field: HANDLER_FIELD_NAME,
                        descriptor: HANDLER_FIELD_DESCRIPTOR,
                    };
                    tracing::error!(class = class.name(), error = %err, "intercept resolution failed");
                    return PatchOutcome::Skipped(err);
                }
            };

        let original = class.vtable();
        let scope = class.scope();
        let mut trampolines = 0;
        let methods: Vec<MethodRef> = original
            .iter()
            .map(|method| {
                let desc = method.content();
                if spec.intercepts(&desc.name) {
                    trampolines += 1;
                    scope.alloc_method(MethodDesc {
                        code: Code::Trampoline(method.clone()),
                        ..desc
                    })
                } else {
                    scope.alloc_method(desc)
                }
            })
            .collect();
        let intercepted = scope.alloc_table(methods);

        let previous = class.install_vtable(intercepted.clone());
        entry.resolve(ResolvedEntry {
            class: class.clone(),
            handler_class,
            handler_offset,
            intercepted,
            original: previous,
        });

        tracing::debug!(
            class = class.name(),
            handler = spec.handler_class,
            slots = original.len(),
            trampolines,
            "class patched"
        );
        PatchOutcome::Patched { trampolines }
    }
}

#[cfg(test)]
mod tests {
    use super::super::config::InterceptSpec;
    use super::super::{InterceptOptions, SwapMode};
    use super::*;
    use crate::vm::interpreter::{ClassDef, Vm, VmOptions};
    use crate::vm::object::Visibility;
    use crate::vm::value::Value;

    static SPECS: &[InterceptSpec] = &[
        InterceptSpec::new("P.Widget", &["draw", "missing"], "P.WidgetHandler"),
        InterceptSpec::new("P.NoHandler", &["draw"], "P.Nowhere"),
        InterceptSpec::new("P.NoField", &["draw"], "P.WidgetHandler"),
    ];

    fn vm() -> Vm {
        Vm::with_options(VmOptions {
            intercept: InterceptOptions {
                specs: SPECS,
                swap_mode: SwapMode::PerCall,
            },
            ..Default::default()
        })
    }

    fn widget_def(name: &str) -> ClassDef {
        ClassDef::new(name)
            .handler_field()
            .method("size", Visibility::Public, |_, _, args| {
                Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))
            })
            .method("draw", Visibility::Public, |_, _, _| Ok(Value::str("drawn")))
    }

    fn handler_def() -> ClassDef {
        ClassDef::new("P.WidgetHandler").method("invoke", Visibility::Public, |_, _, _| {
            Ok(Value::Null)
        })
    }

    #[test]
    fn test_unlisted_class_is_untouched() {
        let vm = vm();
        let plain = vm.define_class(widget_def("P.Plain")).unwrap();
        let table = plain.vtable();
        let allocations = plain.scope().allocation_count();

        let outcome = vm.interceptor().patch(&vm, &plain);

        assert_eq!(outcome, PatchOutcome::NotIntercepted);
        assert!(Arc::ptr_eq(&table, &plain.vtable()));
        assert_eq!(plain.scope().allocation_count(), allocations);
    }

    #[test]
    fn test_patch_installs_trampolines_only_for_listed_methods() {
        let vm = vm();
        vm.define_class(handler_def()).unwrap();
        let widget = vm.define_class(widget_def("P.Widget")).unwrap();

        let entry = vm.interceptor().registry().lookup(&widget, false).unwrap();
        let resolved = entry.resolved().unwrap();
        assert!(Arc::ptr_eq(&resolved.intercepted, &widget.vtable()));
        assert!(!Arc::ptr_eq(&resolved.original, &resolved.intercepted));
        assert_eq!(resolved.original.len(), resolved.intercepted.len());
        assert_eq!(entry.trampoline_count(), 1);

        for (original, patched) in resolved.original.iter().zip(resolved.intercepted.iter()) {
            assert!(!Arc::ptr_eq(original, patched));
            let desc = patched.content();
            assert_eq!(desc.name, original.name());
            assert_eq!(desc.slot, original.slot());
            if &*desc.name == "draw" {
                assert!(Arc::ptr_eq(desc.original().unwrap(), original));
            } else {
                assert!(!desc.is_trampoline());
            }
        }
    }

    #[test]
    fn test_untouched_slots_behave_as_before() {
        let vm = vm();
        vm.define_class(handler_def()).unwrap();
        let widget = vm.define_class(widget_def("P.Widget")).unwrap();
        let obj = vm.allocate(&widget).unwrap();

        for n in [-3, 0, 7, 1 << 40] {
            let result = vm.invoke_virtual(&obj, "size", &[Value::Int(n)]).unwrap();
            assert_eq!(result, Value::Int(n * 2));
        }
    }

    #[test]
    fn test_patch_is_idempotent() {
        let vm = vm();
        vm.define_class(handler_def()).unwrap();
        let widget = vm.define_class(widget_def("P.Widget")).unwrap();
        let table = widget.vtable();
        let allocations = widget.scope().allocation_count();

        assert_eq!(
            vm.interceptor().patch(&vm, &widget),
            PatchOutcome::AlreadyPatched
        );
        assert!(Arc::ptr_eq(&table, &widget.vtable()));
        assert_eq!(widget.scope().allocation_count(), allocations);
    }

    #[test]
    fn test_row_bound_to_other_class_soft_fails() {
        let first = vm();
        first.define_class(handler_def()).unwrap();
        let bound = first.define_class(widget_def("P.Widget")).unwrap();

        let second = Vm::with_interceptor(VmOptions::default(), first.interceptor().clone());
        second.define_class(handler_def()).unwrap();
        let widget = second.define_class(widget_def("P.Widget")).unwrap();

        assert_eq!(
            second.interceptor().patch(&second, &widget),
            PatchOutcome::Skipped(ResolveError::BoundToOtherClass("P.Widget".to_string()))
        );
        assert!(widget.vtable().iter().all(|m| !m.is_trampoline()));
        let entry = second.interceptor().registry().lookup(&widget, false).unwrap();
        assert!(entry.resolved_for(&widget).is_none());
        assert!(entry.resolved_for(&bound).is_some());
    }

    #[test]
    fn test_missing_handler_class_soft_fails() {
        let vm = vm();
        let class = vm.define_class(widget_def("P.NoHandler")).unwrap();
        let entry = vm.interceptor().registry().lookup(&class, false).unwrap();

        assert!(!entry.is_resolved());
        assert!(class.vtable().iter().all(|m| !m.is_trampoline()));
        assert_eq!(
            vm.interceptor().patch(&vm, &class),
            PatchOutcome::Skipped(ResolveError::HandlerClassNotFound(
                "P.Nowhere".to_string()
            ))
        );

        let obj = vm.allocate(&class).unwrap();
        assert_eq!(obj.get_field(0), Some(Value::Null));
        assert_eq!(
            vm.invoke_virtual(&obj, "draw", &[]).unwrap(),
            Value::str("drawn")
        );
    }

    #[test]
    fn test_missing_handler_field_soft_fails() {
        let vm = vm();
        vm.define_class(handler_def()).unwrap();
        let class = vm
            .define_class(ClassDef::new("P.NoField").method(
                "draw",
                Visibility::Public,
                |_, _, _| Ok(Value::str("drawn")),
            ))
            .unwrap();

        let outcome = vm.interceptor().patch(&vm, &class);
        assert!(matches!(
            outcome,
            PatchOutcome::Skipped(ResolveError::HandlerFieldMissing { .. })
        ));
        assert!(!outcome.is_patched());
        let obj = vm.allocate(&class).unwrap();
        assert_eq!(
            vm.invoke_virtual(&obj, "draw", &[]).unwrap(),
            Value::str("drawn")
        );
    }
}
