//! Object model and class system
//!
//! Every class owns a dispatch table (`VTable`) of method descriptors. The
//! table pointer is swapped as a whole; a descriptor's content is read and
//! written as a whole record, so a dispatcher never observes a half-written
//! entry.

use crate::vm::engine::Engine;
use crate::vm::scope::ClassScope;
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Global counter for generating unique object IDs
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique object ID
fn generate_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Class ID (index into the VM class registry)
pub type ClassId = usize;
/// Shared class reference
pub type ClassRef = Arc<Class>;
/// Shared object reference
pub type ObjectRef = Arc<Object>;
/// Shared method descriptor cell
pub type MethodRef = Arc<Method>;

/// Native method body: `(engine, this, args) -> result`
pub type NativeFn =
    Arc<dyn Fn(&dyn Engine, &ObjectRef, &[Value]) -> VmResult<Value> + Send + Sync>;

/// Method visibility used by reflective access checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Callable from anywhere
    Public,
    /// Callable from the declaring class and its subclasses
    Protected,
    /// Callable from the declaring class only
    Private,
}

/// The body a descriptor currently references
#[derive(Clone)]
pub enum Code {
    /// Native Rust body
    Native(NativeFn),
    /// No body; dispatching here is an error
    Abstract,
    /// Interception entry point; carries the original descriptor it replaced
    Trampoline(MethodRef),
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Code::Native(_) => write!(f, "Native"),
            Code::Abstract => write!(f, "Abstract"),
            Code::Trampoline(original) => write!(f, "Trampoline(-> {})", original.name()),
        }
    }
}

/// Method descriptor record
///
/// Cloning copies the whole record; this is how descriptors are duplicated
/// into a new dispatch table and how a trampoline's content is saved and
/// restored.
#[derive(Debug, Clone)]
pub struct MethodDesc {
    /// Method name
    pub name: Arc<str>,
    /// Declaring class ID
    pub owner: ClassId,
    /// Declaring class descriptor
    pub owner_name: Arc<str>,
    /// Dispatch slot index (position in the owning table, or in the direct list)
    pub slot: usize,
    /// Visibility for access checks
    pub visibility: Visibility,
    /// Current body
    pub code: Code,
}

impl MethodDesc {
    /// Check whether this record routes to the interception entry point
    pub fn is_trampoline(&self) -> bool {
        matches!(self.code, Code::Trampoline(_))
    }

    /// The original descriptor a trampoline replaced
    pub fn original(&self) -> Option<&MethodRef> {
        match &self.code {
            Code::Trampoline(original) => Some(original),
            _ => None,
        }
    }
}

/// A dispatch-table entry
///
/// The cell has a stable identity (it is what a method handle points at)
/// while its content may be overwritten as a unit.
pub struct Method {
    content: RwLock<MethodDesc>,
}

impl Method {
    /// Create a new descriptor cell
    pub fn new(desc: MethodDesc) -> MethodRef {
        Arc::new(Self {
            content: RwLock::new(desc),
        })
    }

    /// Copy out the current content
    pub fn content(&self) -> MethodDesc {
        self.content.read().clone()
    }

    /// Replace the content, returning the previous record
    pub fn overwrite(&self, desc: MethodDesc) -> MethodDesc {
        std::mem::replace(&mut *self.content.write(), desc)
    }

    /// Method name
    pub fn name(&self) -> Arc<str> {
        self.content.read().name.clone()
    }

    /// Dispatch slot index
    pub fn slot(&self) -> usize {
        self.content.read().slot
    }

    /// Declaring class ID
    pub fn owner(&self) -> ClassId {
        self.content.read().owner
    }

    /// Check whether the current content is a trampoline
    pub fn is_trampoline(&self) -> bool {
        self.content.read().is_trampoline()
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = self.content.read();
        f.debug_struct("Method")
            .field("name", &desc.name)
            .field("owner", &desc.owner_name)
            .field("slot", &desc.slot)
            .field("code", &desc.code)
            .finish()
    }
}

/// Virtual method table for dynamic dispatch
#[derive(Debug, Default)]
pub struct VTable {
    /// Method descriptors (indexed by method slot)
    methods: Vec<MethodRef>,
}

impl VTable {
    /// Create a table from descriptors in slot order
    pub fn new(methods: Vec<MethodRef>) -> Self {
        Self { methods }
    }

    /// Get the descriptor in a slot
    pub fn get(&self, slot: usize) -> Option<&MethodRef> {
        self.methods.get(slot)
    }

    /// Get number of methods
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Iterate over descriptors in slot order
    pub fn iter(&self) -> impl Iterator<Item = &MethodRef> {
        self.methods.iter()
    }
}

/// Instance field declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Type descriptor
    pub descriptor: String,
}

impl FieldDef {
    /// Create a field declaration
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }
}

/// Class definition metadata
pub struct Class {
    /// Class ID (unique identifier)
    id: ClassId,
    /// Class descriptor name
    name: String,
    /// Superclass (None for the root class)
    super_class: Option<ClassRef>,
    /// Instance field layout, inherited fields first; offset = index
    fields: Vec<FieldDef>,
    /// Current dispatch table; swapped as a whole
    vtable: RwLock<Arc<VTable>>,
    /// Link-time method name to slot mapping
    slots: FxHashMap<String, usize>,
    /// Non-virtual methods (never patched)
    direct_methods: Vec<MethodRef>,
    /// Class-lifetime allocation scope
    scope: ClassScope,
    /// Set once the initialization hook has run
    initialized: AtomicBool,
}

impl Class {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ClassId,
        name: String,
        super_class: Option<ClassRef>,
        fields: Vec<FieldDef>,
        vtable: Arc<VTable>,
        slots: FxHashMap<String, usize>,
        direct_methods: Vec<MethodRef>,
        scope: ClassScope,
    ) -> Self {
        Self {
            id,
            name,
            super_class,
            fields,
            vtable: RwLock::new(vtable),
            slots,
            direct_methods,
            scope,
            initialized: AtomicBool::new(false),
        }
    }

    /// Class ID
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Class descriptor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Superclass reference
    pub fn super_class(&self) -> Option<&ClassRef> {
        self.super_class.as_ref()
    }

    /// This class followed by its superclass chain
    pub fn lineage(&self) -> impl Iterator<Item = &Class> {
        std::iter::successors(Some(self), |class| class.super_class.as_deref())
    }

    /// Check whether this class is `id` or derives from it
    pub fn is_subclass_of(&self, id: ClassId) -> bool {
        self.lineage().any(|class| class.id == id)
    }

    /// Instance field layout
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Number of instance fields (including inherited)
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Find an instance field offset by name and type descriptor
    pub fn field_offset(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name && f.descriptor == descriptor)
    }

    /// Current dispatch table
    pub fn vtable(&self) -> Arc<VTable> {
        self.vtable.read().clone()
    }

    /// Install a new dispatch table, returning the previous one
    pub fn install_vtable(&self, table: Arc<VTable>) -> Arc<VTable> {
        std::mem::replace(&mut *self.vtable.write(), table)
    }

    /// Number of dispatch slots
    pub fn vtable_count(&self) -> usize {
        self.vtable.read().len()
    }

    /// Descriptor currently in a slot
    pub fn method_at(&self, slot: usize) -> Option<MethodRef> {
        self.vtable.read().get(slot).cloned()
    }

    /// Resolve a virtual method name to its slot
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    pub(crate) fn slot_map(&self) -> &FxHashMap<String, usize> {
        &self.slots
    }

    /// Non-virtual methods declared by this class
    pub fn direct_methods(&self) -> &[MethodRef] {
        &self.direct_methods
    }

    /// Class-lifetime allocation scope
    pub fn scope(&self) -> &ClassScope {
        &self.scope
    }

    /// Check whether the initialization hook has completed
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("super", &self.super_class.as_ref().map(|c| c.name()))
            .field("fields", &self.fields.len())
            .field("vtable", &self.vtable_count())
            .finish()
    }
}

/// Object instance (heap-allocated)
pub struct Object {
    /// Unique object ID
    id: u64,
    /// Class of this instance
    class: ClassRef,
    /// Field values
    fields: RwLock<Vec<Value>>,
}

impl Object {
    /// Create a new object with null fields
    pub fn new(class: ClassRef) -> Self {
        let field_count = class.field_count();
        Self {
            id: generate_object_id(),
            class,
            fields: RwLock::new(vec![Value::null(); field_count]),
        }
    }

    /// Unique object ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Class of this instance
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// Get a field value by index
    pub fn get_field(&self, index: usize) -> Option<Value> {
        self.fields.read().get(index).cloned()
    }

    /// Set a field value by index
    pub fn set_field(&self, index: usize, value: Value) -> VmResult<()> {
        let mut fields = self.fields.write();
        let count = fields.len();
        match fields.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(VmError::FieldOutOfBounds { index, count }),
        }
    }

    /// Get number of fields
    pub fn field_count(&self) -> usize {
        self.fields.read().len()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("class", &self.class.name())
            .finish()
    }
}
