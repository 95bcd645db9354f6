//! Class-lifetime memory scope
//!
//! Dispatch tables and method descriptors built for a class are allocated
//! from the class's own scope. The scope retains every table it hands out,
//! so an original table that has been swapped out stays valid for as long as
//! the class exists.

use crate::vm::object::{Method, MethodDesc, MethodRef, VTable};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Allocation scope tied to one class
#[derive(Debug)]
pub struct ClassScope {
    /// Name of the defining loader
    loader: Arc<str>,
    /// Number of allocations served
    allocations: AtomicUsize,
    /// Tables kept alive for the class lifetime
    tables: Mutex<Vec<Arc<VTable>>>,
}

impl ClassScope {
    /// Create an empty scope for a loader
    pub fn new(loader: impl AsRef<str>) -> Self {
        Self {
            loader: Arc::from(loader.as_ref()),
            allocations: AtomicUsize::new(0),
            tables: Mutex::new(Vec::new()),
        }
    }

    /// Name of the defining loader
    pub fn loader(&self) -> &str {
        &self.loader
    }

    /// Allocate a method descriptor cell
    pub fn alloc_method(&self, desc: MethodDesc) -> MethodRef {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Method::new(desc)
    }

    /// Allocate a dispatch table and retain it for the class lifetime
    pub fn alloc_table(&self, methods: Vec<MethodRef>) -> Arc<VTable> {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        let table = Arc::new(VTable::new(methods));
        self.tables.lock().push(table.clone());
        table
    }

    /// Number of allocations served so far
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Number of tables retained
    pub fn retained_tables(&self) -> usize {
        self.tables.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::object::{Code, Visibility};

    #[test]
    fn test_scope_counts_and_retains() {
        let scope = ClassScope::new("system");
        assert_eq!(scope.loader(), "system");
        assert_eq!(scope.allocation_count(), 0);

        let method = scope.alloc_method(MethodDesc {
            name: Arc::from("run"),
            owner: 1,
            owner_name: Arc::from("Task"),
            slot: 0,
            visibility: Visibility::Public,
            code: Code::Abstract,
        });
        let table = scope.alloc_table(vec![method]);

        assert_eq!(scope.allocation_count(), 2);
        assert_eq!(scope.retained_tables(), 1);
        // scope + caller
        assert_eq!(Arc::strong_count(&table), 2);
    }
}
