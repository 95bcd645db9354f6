//! Interpose Engine
//!
//! Runtime method interception for a virtual-dispatch VM:
//! - **Intercept**: registry, class patcher, instance binder, handler accessor,
//!   access gate and call guard (`vm::intercept`)
//! - **Host**: a compact class/object model and dispatcher the interception
//!   core is driven by (`vm::object`, `vm::interpreter`)
//!
//! # Example
//!
//! ```rust,ignore
//! use interpose_engine::{ClassDef, Value, Visibility, Vm};
//!
//! let vm = Vm::new();
//! vm.define_class(
//!     ClassDef::new("App.ActivityInvocationHandler").method(
//!         "invoke",
//!         Visibility::Public,
//!         |engine, this, args| {
//!             let target = args[0].as_object().cloned().unwrap();
//!             let method = args[1].as_method().cloned().unwrap();
//!             engine.invoke_method(Some(this.class().as_ref()), &method, &target, &args[2..])
//!         },
//!     ),
//! )?;
//! let activity = vm.define_class(
//!     ClassDef::new("App.Activity")
//!         .handler_field()
//!         .method("onResume", Visibility::Protected, |_, _, _| Ok(Value::Null)),
//! )?;
//! let obj = vm.allocate(&activity)?;
//! vm.invoke_virtual(&obj, "onResume", &[])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod vm;

pub use vm::engine::Engine;
pub use vm::intercept::{
    AccessGate, CallGuard, ClassPatcher, EntryStats, HandlerAccessor, InstanceBinder,
    InterceptOptions, InterceptRegistry, InterceptSpec, Interceptor, PatchOutcome, RegistryEntry,
    ResolveError, ResolvedEntry, SwapMode, BUILTIN_INTERCEPTS, HANDLER_FIELD_DESCRIPTOR,
    HANDLER_FIELD_NAME, HANDLER_INVOKE_METHOD,
};
pub use vm::interpreter::{
    ClassDef, ClassRegistry, Vm, VmOptions, PROXY_CLASS, ROOT_CLASS, SYSTEM_LOADER,
};
pub use vm::object::{
    Class, ClassId, ClassRef, Code, FieldDef, Method, MethodDesc, MethodRef, NativeFn, Object,
    ObjectRef, VTable, Visibility,
};
pub use vm::scope::ClassScope;
pub use vm::value::Value;
pub use vm::{VmError, VmResult};
