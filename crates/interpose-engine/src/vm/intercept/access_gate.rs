//! Access-check hook for handler classes
//!
//! Handler classes are trusted to call any method of any class, so that a
//! handler can call through to a non-public original. The grant is by class
//! name only.

use super::registry::InterceptRegistry;
use crate::vm::object::Class;
use std::sync::Arc;

/// Answers whether a class is one of the configured handler classes
#[derive(Debug)]
pub struct AccessGate {
    registry: Arc<InterceptRegistry>,
}

impl AccessGate {
    /// Create a gate over a registry
    pub fn new(registry: Arc<InterceptRegistry>) -> Self {
        Self { registry }
    }

    /// Check whether `class` is an interceptor handler class
    pub fn is_interceptor_handler_class(&self, class: &Class) -> bool {
        self.registry.is_handler_class_name(class.name())
    }
}
