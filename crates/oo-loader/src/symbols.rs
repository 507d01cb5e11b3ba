//! Process-wide symbol table
//!
//! Maps fully qualified symbol names to host addresses. Addresses point
//! either into a loaded module's RWX region or at a host HLE function, so
//! the table must be torn down no later than the module registry.

use std::collections::HashMap;
use tracing::trace;

/// Opaque host address of a guest or HLE symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostAddr(*const u8);

impl HostAddr {
    pub fn new(ptr: *const u8) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *const u8 {
        self.0
    }
}

/// Global name -> address mapping with no removal API
#[derive(Default)]
pub struct SymbolTable {
    map: HashMap<String, HostAddr>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, overwriting any previous binding
    pub fn register(&mut self, name: &str, address: HostAddr) {
        trace!("Registering symbol {} -> {:p}", name, address.as_ptr());
        self.map.insert(name.to_string(), address);
    }

    /// Register `name` only if it has no binding yet
    pub fn register_if_absent(&mut self, name: &str, address: HostAddr) {
        if !self.map.contains_key(name) {
            trace!("Registering symbol {} -> {:p}", name, address.as_ptr());
            self.map.insert(name.to_string(), address);
        }
    }

    pub fn get_symbol_address(&self, name: &str) -> Option<HostAddr> {
        self.map.get(name).copied()
    }

    pub fn symbol_count(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static A: u8 = 1;
    static B: u8 = 2;

    #[test]
    fn test_register_overwrites() {
        let mut table = SymbolTable::new();
        table.register("foo", HostAddr::new(&A));
        table.register("foo", HostAddr::new(&B));
        assert_eq!(table.symbol_count(), 1);
        assert_eq!(
            table.get_symbol_address("foo").unwrap().as_ptr(),
            &B as *const u8
        );
    }

    #[test]
    fn test_register_if_absent_keeps_first() {
        let mut table = SymbolTable::new();
        table.register_if_absent("foo", HostAddr::new(&A));
        table.register_if_absent("foo", HostAddr::new(&B));
        assert_eq!(
            table.get_symbol_address("foo").unwrap().as_ptr(),
            &A as *const u8
        );
    }

    #[test]
    fn test_missing_lookup() {
        let table = SymbolTable::new();
        assert!(table.get_symbol_address("nope").is_none());
        assert!(table.is_empty());
    }
}
