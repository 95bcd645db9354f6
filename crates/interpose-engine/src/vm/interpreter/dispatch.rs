//! Method dispatch
//!
//! Virtual calls resolve a name to a slot through the link-time slot map and
//! then read the receiver class's current table. The descriptor's content is
//! copied once per call; a trampoline body hands control to the interception
//! core.

use super::Vm;
use crate::vm::object::{Class, Code, MethodDesc, MethodRef, ObjectRef, Visibility};
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};
use std::cell::Cell;

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Bounds nested calls on the current thread
struct DepthGuard;

impl DepthGuard {
    fn enter(max: usize) -> VmResult<Self> {
        CALL_DEPTH.with(|depth| {
            let next = depth.get() + 1;
            if next > max {
                return Err(VmError::StackOverflow(next));
            }
            depth.set(next);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

impl Vm {
    /// Call a virtual method by name
    pub fn invoke_virtual(&self, this: &ObjectRef, name: &str, args: &[Value]) -> VmResult<Value> {
        let slot = this
            .class()
            .slot_of(name)
            .ok_or_else(|| VmError::MethodNotFound {
                class: this.class().name().to_string(),
                method: name.to_string(),
            })?;
        self.invoke_slot(this, slot, args)
    }

    /// Call whatever the receiver's current table holds in `slot`
    pub fn invoke_slot(&self, this: &ObjectRef, slot: usize, args: &[Value]) -> VmResult<Value> {
        let method = this
            .class()
            .method_at(slot)
            .ok_or_else(|| VmError::MethodNotFound {
                class: this.class().name().to_string(),
                method: format!("#{}", slot),
            })?;
        self.execute(&method, this, args)
    }

    /// Call a non-virtual method declared by the receiver class or a superclass
    pub fn invoke_direct(&self, this: &ObjectRef, name: &str, args: &[Value]) -> VmResult<Value> {
        let method = this
            .class()
            .lineage()
            .flat_map(|class| class.direct_methods().iter())
            .find(|m| &*m.name() == name)
            .cloned()
            .ok_or_else(|| VmError::MethodNotFound {
                class: this.class().name().to_string(),
                method: name.to_string(),
            })?;
        self.execute(&method, this, args)
    }

    /// Reflective invoke of a method handle, with receiver and access checks
    pub fn invoke_method(
        &self,
        caller: Option<&Class>,
        method: &MethodRef,
        this: &ObjectRef,
        args: &[Value],
    ) -> VmResult<Value> {
        let desc = method.content();
        if !this.class().is_subclass_of(desc.owner) {
            return Err(VmError::TypeError(format!(
                "{} is not an instance of {}",
                this.class().name(),
                desc.owner_name
            )));
        }
        self.check_access(caller, &desc)?;
        self.execute(method, this, args)
    }

    /// Check whether `caller` may invoke `desc`
    ///
    /// `None` is a trusted host call. Interceptor handler classes are allowed
    /// everything.
    pub fn check_access(&self, caller: Option<&Class>, desc: &MethodDesc) -> VmResult<()> {
        let Some(caller) = caller else {
            return Ok(());
        };
        let visible = match desc.visibility {
            Visibility::Public => true,
            Visibility::Protected => caller.is_subclass_of(desc.owner),
            Visibility::Private => caller.id() == desc.owner,
        };
        if visible || self.interceptor.is_interceptor_handler_class(caller) {
            Ok(())
        } else {
            Err(VmError::IllegalAccess {
                caller: caller.name().to_string(),
                owner: desc.owner_name.to_string(),
                method: desc.name.to_string(),
            })
        }
    }

    /// Run the body the descriptor currently references
    pub fn execute(&self, method: &MethodRef, this: &ObjectRef, args: &[Value]) -> VmResult<Value> {
        let _depth = DepthGuard::enter(self.options.max_call_depth)?;
        let desc = method.content();
        match desc.code {
            Code::Native(body) => body(self, this, args),
            Code::Abstract => Err(VmError::AbstractMethod(format!(
                "{}.{}",
                desc.owner_name, desc.name
            ))),
            Code::Trampoline(_) => self.interceptor.invoke_trampoline(self, this, method, args),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::interpreter::{ClassDef, Vm, VmOptions};
    use crate::vm::object::Visibility;
    use crate::vm::value::Value;
    use crate::vm::{Engine, VmError};

    fn shapes(vm: &Vm) {
        vm.define_class(
            ClassDef::new("S.Shape")
                .method("name", Visibility::Public, |_, _, _| Ok(Value::str("shape")))
                .method("secret", Visibility::Private, |_, _, _| Ok(Value::Int(1)))
                .method("hook", Visibility::Protected, |_, _, _| Ok(Value::Int(2)))
                .abstract_method("area", Visibility::Public)
                .direct_method("init", Visibility::Private, |_, _, _| Ok(Value::str("init"))),
        )
        .unwrap();
        vm.define_class(
            ClassDef::new("S.Square")
                .extends("S.Shape")
                .method("area", Visibility::Public, |_, _, args| {
                    let side = args[0].as_int().unwrap_or(0);
                    Ok(Value::Int(side * side))
                }),
        )
        .unwrap();
        vm.define_class(ClassDef::new("S.Stranger")).unwrap();
    }

    #[test]
    fn test_virtual_dispatch_uses_override() {
        let vm = Vm::new();
        shapes(&vm);
        let shape = vm.allocate(&vm.find_class("S.Shape").unwrap()).unwrap();
        let square = vm.allocate(&vm.find_class("S.Square").unwrap()).unwrap();

        assert_eq!(
            vm.invoke_virtual(&square, "area", &[Value::Int(4)]).unwrap(),
            Value::Int(16)
        );
        assert_eq!(vm.invoke_virtual(&square, "name", &[]).unwrap(), Value::str("shape"));
        assert!(matches!(
            vm.invoke_virtual(&shape, "area", &[]),
            Err(VmError::AbstractMethod(_))
        ));
        assert!(matches!(
            vm.invoke_virtual(&shape, "perimeter", &[]),
            Err(VmError::MethodNotFound { .. })
        ));
        assert!(matches!(
            vm.invoke_slot(&shape, 99, &[]),
            Err(VmError::MethodNotFound { .. })
        ));
    }

    #[test]
    fn test_direct_methods_are_inherited() {
        let vm = Vm::new();
        shapes(&vm);
        let square = vm.allocate(&vm.find_class("S.Square").unwrap()).unwrap();
        assert_eq!(vm.invoke_direct(&square, "init", &[]).unwrap(), Value::str("init"));
    }

    #[test]
    fn test_reflective_access_rules() {
        let vm = Vm::new();
        shapes(&vm);
        let shape_class = vm.find_class("S.Shape").unwrap();
        let square_class = vm.find_class("S.Square").unwrap();
        let stranger = vm.find_class("S.Stranger").unwrap();
        let square = vm.allocate(&square_class).unwrap();

        let secret = shape_class.method_at(shape_class.slot_of("secret").unwrap()).unwrap();
        let hook = shape_class.method_at(shape_class.slot_of("hook").unwrap()).unwrap();

        assert!(vm.invoke_method(None, &secret, &square, &[]).is_ok());
        assert!(vm.invoke_method(Some(&*shape_class), &secret, &square, &[]).is_ok());
        assert!(matches!(
            vm.invoke_method(Some(&*square_class), &secret, &square, &[]),
            Err(VmError::IllegalAccess { .. })
        ));
        assert!(vm.invoke_method(Some(&*square_class), &hook, &square, &[]).is_ok());
        assert!(matches!(
            vm.invoke_method(Some(&*stranger), &hook, &square, &[]),
            Err(VmError::IllegalAccess { .. })
        ));
    }

    #[test]
    fn test_reflective_receiver_check() {
        let vm = Vm::new();
        shapes(&vm);
        let shape_class = vm.find_class("S.Shape").unwrap();
        let stranger = vm.allocate(&vm.find_class("S.Stranger").unwrap()).unwrap();
        let name = shape_class.method_at(0).unwrap();
        assert!(matches!(
            vm.invoke_method(None, &name, &stranger, &[]),
            Err(VmError::TypeError(_))
        ));
    }

    #[test]
    fn test_call_depth_is_bounded() {
        let vm = Vm::with_options(VmOptions {
            max_call_depth: 16,
            ..Default::default()
        });
        let class = vm
            .define_class(ClassDef::new("S.Loop").method(
                "spin",
                Visibility::Public,
                |engine, this, _| engine.invoke_virtual(this, "spin", &[]),
            ))
            .unwrap();
        let obj = vm.allocate(&class).unwrap();
        assert!(matches!(
            vm.invoke_virtual(&obj, "spin", &[]),
            Err(VmError::StackOverflow(17))
        ));
        // depth unwound
        assert!(matches!(
            Engine::invoke_virtual(&vm, &obj, "spin", &[]),
            Err(VmError::StackOverflow(17))
        ));
    }
}
