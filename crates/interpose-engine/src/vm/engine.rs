//! Host engine contract
//!
//! The interception core never owns classes, objects or the dispatcher. It
//! reaches them through this trait, which the host VM implements.

use crate::vm::object::{Class, ClassRef, MethodRef, ObjectRef};
use crate::vm::value::Value;
use crate::vm::VmResult;

/// Capabilities the interception core requires from the host engine
pub trait Engine: Send + Sync {
    /// Find an initialized class by descriptor name
    fn find_class(&self, descriptor: &str) -> Option<ClassRef>;

    /// Find an instance field offset by name and type descriptor
    fn find_field_offset(&self, class: &Class, name: &str, descriptor: &str) -> Option<usize> {
        class.field_offset(name, descriptor)
    }

    /// Allocate an instance of `class`, running the allocation hook
    fn allocate_instance(&self, class: &ClassRef) -> VmResult<ObjectRef>;

    /// The built-in dynamic-proxy base type
    fn proxy_class(&self) -> &ClassRef;

    /// Offset of the dynamic-proxy base type's own handler field
    fn proxy_handler_offset(&self) -> usize;

    /// Virtual call: resolve `name` to a slot and dispatch through the
    /// receiver class's current table
    fn invoke_virtual(&self, this: &ObjectRef, name: &str, args: &[Value]) -> VmResult<Value>;

    /// Reflective invoke of a method handle on `this`
    ///
    /// # Arguments
    /// * `caller` - Class performing the call, checked against the method's
    ///   visibility; `None` for trusted host calls
    fn invoke_method(
        &self,
        caller: Option<&Class>,
        method: &MethodRef,
        this: &ObjectRef,
        args: &[Value],
    ) -> VmResult<Value>;

    /// Run whatever body the descriptor currently references
    fn execute(&self, method: &MethodRef, this: &ObjectRef, args: &[Value]) -> VmResult<Value>;
}
