//! Class registry for managing initialized classes

use crate::vm::object::{ClassId, ClassRef};
use rustc_hash::FxHashMap;

/// Registry of initialized classes
#[derive(Debug)]
pub struct ClassRegistry {
    /// Classes indexed by ID
    classes: Vec<ClassRef>,
    /// Class name to ID mapping
    name_to_id: FxHashMap<String, ClassId>,
}

impl ClassRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            classes: Vec::new(),
            name_to_id: FxHashMap::default(),
        }
    }

    /// Register a new class
    pub fn register_class(&mut self, class: ClassRef) -> ClassId {
        let id = class.id();
        self.name_to_id.insert(class.name().to_string(), id);
        self.classes.push(class);
        id
    }

    /// Get class by ID
    pub fn get_class(&self, id: ClassId) -> Option<&ClassRef> {
        self.classes.get(id)
    }

    /// Get class by name
    pub fn get_class_by_name(&self, name: &str) -> Option<&ClassRef> {
        self.name_to_id
            .get(name)
            .and_then(|id| self.classes.get(*id))
    }

    /// Check whether a class name is taken
    pub fn contains(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    /// Get next available class ID
    pub fn next_class_id(&self) -> ClassId {
        self.classes.len()
    }

    /// Number of registered classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}
