//! Host VM
//!
//! Owns the class registry and the interception core, and drives the core's
//! hooks: `patch` when a class is initialized, `on_allocate` when an object
//! is allocated, and the trampoline entry point from dispatch.

pub(crate) mod class_def;
mod class_registry;
mod dispatch;

pub use class_def::{ClassDef, SYSTEM_LOADER};
pub use class_registry::ClassRegistry;

use crate::vm::engine::Engine;
use crate::vm::intercept::{InterceptOptions, Interceptor, HANDLER_FIELD_DESCRIPTOR, HANDLER_FIELD_NAME};
use crate::vm::object::{Class, ClassRef, MethodRef, Object, ObjectRef};
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Descriptor of the root class
pub const ROOT_CLASS: &str = "interpose.lang.Object";

/// Descriptor of the built-in dynamic-proxy base type
pub const PROXY_CLASS: &str = "interpose.reflect.Proxy";

/// VM configuration options
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Interception table and call guard strategy
    pub intercept: InterceptOptions,
    /// Maximum nested calls per thread
    pub max_call_depth: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            intercept: InterceptOptions::default(),
            max_call_depth: 1024,
        }
    }
}

/// Interpose virtual machine
pub struct Vm {
    /// Initialized classes
    classes: RwLock<ClassRegistry>,
    /// Serializes class definition (ID assignment through publication)
    define_lock: Mutex<()>,
    /// Interception core
    interceptor: Arc<Interceptor>,
    root_class: ClassRef,
    proxy_class: ClassRef,
    proxy_handler_offset: usize,
    options: VmOptions,
    /// Objects allocated so far
    allocations: AtomicUsize,
}

impl Vm {
    /// Create a VM with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a VM with the given options
    pub fn with_options(options: VmOptions) -> Self {
        let interceptor = Arc::new(Interceptor::new(options.intercept.clone()));
        Self::with_interceptor(options, interceptor)
    }

    /// Create a VM around an existing interception core
    ///
    /// `options.intercept` is ignored; the core's own registry and swap mode
    /// apply. Each row binds to the first class patched under its name, so a
    /// core shared between VMs intercepts that class only; same-named classes
    /// in the other VMs stay unpatched.
    pub fn with_interceptor(options: VmOptions, interceptor: Arc<Interceptor>) -> Self {
        let root_class = Arc::new(class_def::link(ClassDef::new(ROOT_CLASS), 0, None));
        let proxy_class = Arc::new(class_def::link(
            ClassDef::new(PROXY_CLASS).field(HANDLER_FIELD_NAME, HANDLER_FIELD_DESCRIPTOR),
            1,
            Some(root_class.clone()),
        ));
        let proxy_handler_offset = proxy_class.field_count() - 1;

        let vm = Self {
            classes: RwLock::new(ClassRegistry::new()),
            define_lock: Mutex::new(()),
            interceptor,
            root_class: root_class.clone(),
            proxy_class: proxy_class.clone(),
            proxy_handler_offset,
            options,
            allocations: AtomicUsize::new(0),
        };
        for class in [root_class, proxy_class] {
            vm.initialize(&class);
            vm.classes.write().register_class(class);
        }
        vm
    }

    /// The interception core
    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    /// VM options
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// The root class
    pub fn root_class(&self) -> &ClassRef {
        &self.root_class
    }

    /// Link, initialize and publish a class
    ///
    /// The superclass must already be defined. The class-initialization
    /// hook runs before the class becomes visible to `find_class`.
    pub fn define_class(&self, def: ClassDef) -> VmResult<ClassRef> {
        let _define = self.define_lock.lock();

        let (id, super_class) = {
            let classes = self.classes.read();
            if classes.contains(&def.name) {
                return Err(VmError::DuplicateClass(def.name));
            }
            let super_name = def.super_name.as_deref().unwrap_or(ROOT_CLASS);
            let super_class = classes
                .get_class_by_name(super_name)
                .cloned()
                .ok_or_else(|| VmError::ClassNotFound(super_name.to_string()))?;
            (classes.next_class_id(), super_class)
        };

        let class = Arc::new(class_def::link(def, id, Some(super_class)));
        self.initialize(&class);
        self.classes.write().register_class(class.clone());
        Ok(class)
    }

    fn initialize(&self, class: &ClassRef) {
        let outcome = self.interceptor.patch(self, class);
        tracing::debug!(class = class.name(), id = class.id(), ?outcome, "class initialized");
        class.mark_initialized();
    }

    /// Find a class by descriptor name
    pub fn find_class(&self, name: &str) -> Option<ClassRef> {
        self.classes.read().get_class_by_name(name).cloned()
    }

    /// Find a class by ID
    pub fn class_by_id(&self, id: usize) -> Option<ClassRef> {
        self.classes.read().get_class(id).cloned()
    }

    /// Number of defined classes (including built-ins)
    pub fn class_count(&self) -> usize {
        self.classes.read().len()
    }

    /// Allocate an instance of `class` and run the allocation hook
    pub fn allocate(&self, class: &ClassRef) -> VmResult<ObjectRef> {
        if !class.is_initialized() {
            return Err(VmError::RuntimeError(format!(
                "class {} is not initialized",
                class.name()
            )));
        }
        let object = Arc::new(Object::new(class.clone()));
        self.interceptor.on_allocate(self, &object)?;
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(object)
    }

    /// Number of objects allocated so far (handlers included)
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for Vm {
    fn find_class(&self, descriptor: &str) -> Option<ClassRef> {
        Vm::find_class(self, descriptor)
    }

    fn allocate_instance(&self, class: &ClassRef) -> VmResult<ObjectRef> {
        self.allocate(class)
    }

    fn proxy_class(&self) -> &ClassRef {
        &self.proxy_class
    }

    fn proxy_handler_offset(&self) -> usize {
        self.proxy_handler_offset
    }

    fn invoke_virtual(&self, this: &ObjectRef, name: &str, args: &[Value]) -> VmResult<Value> {
        Vm::invoke_virtual(self, this, name, args)
    }

    fn invoke_method(
        &self,
        caller: Option<&Class>,
        method: &MethodRef,
        this: &ObjectRef,
        args: &[Value],
    ) -> VmResult<Value> {
        Vm::invoke_method(self, caller, method, this, args)
    }

    fn execute(&self, method: &MethodRef, this: &ObjectRef, args: &[Value]) -> VmResult<Value> {
        Vm::execute(self, method, this, args)
    }
}
