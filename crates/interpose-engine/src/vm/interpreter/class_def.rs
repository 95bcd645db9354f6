//! Class definitions and linking
//!
//! A subclass starts from its superclass's current dispatch table: the
//! descriptors are shared, overrides replace a slot, new methods append.

use crate::vm::engine::Engine;
use crate::vm::intercept::{HANDLER_FIELD_DESCRIPTOR, HANDLER_FIELD_NAME};
use crate::vm::object::{Class, ClassId, ClassRef, Code, FieldDef, MethodDesc, NativeFn, ObjectRef, Visibility};
use crate::vm::scope::ClassScope;
use crate::vm::value::Value;
use crate::vm::VmResult;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Default loader name for class scopes
pub const SYSTEM_LOADER: &str = "system";

struct MethodDef {
    name: String,
    visibility: Visibility,
    code: Code,
}

/// Builder for a class to be linked and initialized by the VM
pub struct ClassDef {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    loader: String,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    direct_methods: Vec<MethodDef>,
}

impl ClassDef {
    /// Start a class definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            super_name: None,
            loader: SYSTEM_LOADER.to_string(),
            fields: Vec::new(),
            methods: Vec::new(),
            direct_methods: Vec::new(),
        }
    }

    /// Set the superclass (defaults to the root class)
    pub fn extends(mut self, super_name: impl Into<String>) -> Self {
        self.super_name = Some(super_name.into());
        self
    }

    /// Set the defining loader name
    pub fn loader(mut self, loader: impl Into<String>) -> Self {
        self.loader = loader.into();
        self
    }

    /// Declare an instance field
    pub fn field(mut self, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.fields.push(FieldDef::new(name, descriptor));
        self
    }

    /// Declare the invocation handler field interception binds into
    pub fn handler_field(self) -> Self {
        self.field(HANDLER_FIELD_NAME, HANDLER_FIELD_DESCRIPTOR)
    }

    /// Declare or override a virtual method
    pub fn method<F>(mut self, name: impl Into<String>, visibility: Visibility, body: F) -> Self
    where
        F: Fn(&dyn Engine, &ObjectRef, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        let body: NativeFn = Arc::new(body);
        self.methods.push(MethodDef {
            name: name.into(),
            visibility,
            code: Code::Native(body),
        });
        self
    }

    /// Declare a virtual method without a body
    pub fn abstract_method(mut self, name: impl Into<String>, visibility: Visibility) -> Self {
        self.methods.push(MethodDef {
            name: name.into(),
            visibility,
            code: Code::Abstract,
        });
        self
    }

    /// Declare a non-virtual method
    pub fn direct_method<F>(
        mut self,
        name: impl Into<String>,
        visibility: Visibility,
        body: F,
    ) -> Self
    where
        F: Fn(&dyn Engine, &ObjectRef, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
    {
        let body: NativeFn = Arc::new(body);
        self.direct_methods.push(MethodDef {
            name: name.into(),
            visibility,
            code: Code::Native(body),
        });
        self
    }

    /// Class descriptor name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Lay out fields and build the dispatch table for `def`
pub(crate) fn link(def: ClassDef, id: ClassId, super_class: Option<ClassRef>) -> Class {
    let scope = ClassScope::new(&def.loader);
    let owner_name: Arc<str> = Arc::from(def.name.as_str());

    let mut fields = super_class
        .as_ref()
        .map(|s| s.fields().to_vec())
        .unwrap_or_default();
    fields.extend(def.fields);

    let (mut methods, mut slots) = match &super_class {
        Some(s) => (s.vtable().iter().cloned().collect::<Vec<_>>(), s.slot_map().clone()),
        None => (Vec::new(), FxHashMap::default()),
    };

    for m in def.methods {
        let slot = match slots.get(&m.name) {
            Some(&slot) => slot,
            None => {
                let slot = methods.len();
                slots.insert(m.name.clone(), slot);
                slot
            }
        };
        let method = scope.alloc_method(MethodDesc {
            name: Arc::from(m.name.as_str()),
            owner: id,
            owner_name: owner_name.clone(),
            slot,
            visibility: m.visibility,
            code: m.code,
        });
        if slot < methods.len() {
            methods[slot] = method;
        } else {
            methods.push(method);
        }
    }
    let vtable = scope.alloc_table(methods);

    let direct_methods = def
        .direct_methods
        .into_iter()
        .enumerate()
        .map(|(index, m)| {
            scope.alloc_method(MethodDesc {
                name: Arc::from(m.name.as_str()),
                owner: id,
                owner_name: owner_name.clone(),
                slot: index,
                visibility: m.visibility,
                code: m.code,
            })
        })
        .collect();

    Class::new(id, def.name, super_class, fields, vtable, slots, direct_methods, scope)
}
