//! Interpose VM Core
//!
//! This module provides:
//! - Object model and class system with per-class dispatch tables
//! - Class-lifetime memory scopes
//! - The host engine contract consumed by the interception core
//! - A dispatcher that resolves virtual calls by (current table, slot)
//! - Method interception (registry, patching, binding, call guard)

pub mod engine;
pub mod intercept;
pub mod interpreter;
pub mod object;
pub mod scope;
pub mod value;

pub use engine::Engine;
pub use interpreter::{ClassDef, ClassRegistry, Vm, VmOptions};
pub use object::{Class, ClassRef, Method, MethodDesc, MethodRef, Object, ObjectRef, VTable};
pub use value::Value;

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Call depth exceeded the configured maximum
    #[error("Stack overflow (call depth {0})")]
    StackOverflow(usize),

    /// Class lookup by descriptor failed
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    /// A class with the same descriptor is already defined
    #[error("Duplicate class: {0}")]
    DuplicateClass(String),

    /// No virtual or direct method with this name
    #[error("Method not found: {class}.{method}")]
    MethodNotFound {
        /// Receiver class descriptor
        class: String,
        /// Requested method name
        method: String,
    },

    /// Dispatch reached a method without a body
    #[error("Abstract method invoked: {0}")]
    AbstractMethod(String),

    /// Access check rejected a reflective invoke
    #[error("Illegal access: {caller} cannot invoke {owner}.{method}")]
    IllegalAccess {
        /// Calling class descriptor
        caller: String,
        /// Declaring class descriptor
        owner: String,
        /// Method name
        method: String,
    },

    /// Field index outside the object's layout
    #[error("Field index {index} out of bounds (object has {count} fields)")]
    FieldOutOfBounds {
        /// Requested index
        index: usize,
        /// Number of fields in the object
        count: usize,
    },

    /// Type error
    #[error("Type error: {0}")]
    TypeError(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
