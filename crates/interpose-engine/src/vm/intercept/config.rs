//! Compiled-in interception table and options

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Name of the instance field holding an intercepted object's handler
pub const HANDLER_FIELD_NAME: &str = "h";

/// Type descriptor of the handler field
pub const HANDLER_FIELD_DESCRIPTOR: &str = "interpose.reflect.InvocationHandler";

/// Virtual method a handler class must declare to receive redirected calls
pub const HANDLER_INVOKE_METHOD: &str = "invoke";

/// One row of the interception table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterceptSpec {
    /// Intercepted class descriptor
    pub class_name: &'static str,
    /// Method names to intercept, in declaration order
    pub methods: &'static [&'static str],
    /// Handler class descriptor bound to each instance
    pub handler_class: &'static str,
}

impl InterceptSpec {
    /// Create a table row
    pub const fn new(
        class_name: &'static str,
        methods: &'static [&'static str],
        handler_class: &'static str,
    ) -> Self {
        Self {
            class_name,
            methods,
            handler_class,
        }
    }

    /// Check whether `method` is in this row's method set
    pub fn intercepts(&self, method: &str) -> bool {
        self.methods.iter().any(|m| *m == method)
    }
}

/// The compiled-in interception table
pub static BUILTIN_INTERCEPTS: &[InterceptSpec] = &[InterceptSpec::new(
    "App.Activity",
    &["onResume"],
    "App.ActivityInvocationHandler",
)];

/// How a call guard keeps a handler's call-through from re-entering the
/// handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwapMode {
    /// Record the window in a thread-local, call-scoped indicator keyed by
    /// (trampoline, receiver). Tables and descriptors are never mutated
    /// after patching.
    #[default]
    PerCall,
    /// Swap the class-wide table to the original and overwrite the
    /// trampoline's content for the duration of the window.
    ///
    /// Windows on different instances of one class share this state: with
    /// concurrent calls one thread's `leave` can re-arm the class inside
    /// another thread's window, and overlapping windows can leave the slot
    /// disarmed. Not safe for concurrent use.
    ClassWide,
}

impl SwapMode {
    /// CLI spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapMode::PerCall => "per-call",
            SwapMode::ClassWide => "class-wide",
        }
    }
}

impl fmt::Display for SwapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "per-call" | "percall" => Ok(SwapMode::PerCall),
            "class-wide" | "classwide" => Ok(SwapMode::ClassWide),
            other => Err(format!(
                "unknown swap mode '{}' (expected per-call or class-wide)",
                other
            )),
        }
    }
}

/// Interception options
#[derive(Debug, Clone)]
pub struct InterceptOptions {
    /// Interception table
    pub specs: &'static [InterceptSpec],
    /// Call guard strategy
    pub swap_mode: SwapMode,
}

impl Default for InterceptOptions {
    fn default() -> Self {
        Self {
            specs: BUILTIN_INTERCEPTS,
            swap_mode: SwapMode::default(),
        }
    }
}
