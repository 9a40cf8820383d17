//! Compile-time scope tracking for local slot allocation

use rustc_hash::FxHashMap;

/// Number of local slots the VM provides
pub const MAX_SLOTS: usize = vibe_bytecode::MAX_LOCAL_SLOTS;

/// How a name declared in a scope is stored at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Local slot index
    Slot(u8),
    /// Variable table entry (loop variables, macro parameters, named `with`)
    Named,
}

/// A lexical scope
#[derive(Debug, Default)]
struct Scope {
    bindings: FxHashMap<String, Binding>,
    /// First slot this scope allocated; released on exit
    slot_base: usize,
}

/// Scope chain for variable resolution
///
/// Only `with` blocks allocate slots. Every other binding construct declares
/// its names as [`Binding::Named`] so that an inner loop variable or macro
/// parameter correctly shadows an outer slot of the same name.
#[derive(Debug, Default)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
    next_slot: usize,
}

impl ScopeChain {
    /// Create a new scope chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a new scope
    pub fn enter(&mut self) {
        self.scopes.push(Scope {
            bindings: FxHashMap::default(),
            slot_base: self.next_slot,
        });
    }

    /// Exit current scope, releasing its slots
    pub fn exit(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            self.next_slot = scope.slot_base;
        }
    }

    /// Slots still free
    pub fn free_slots(&self) -> usize {
        MAX_SLOTS - self.next_slot
    }

    /// Declare `name` in a fresh slot of the current scope
    pub fn declare_slot(&mut self, name: &str) -> Option<u8> {
        if self.next_slot >= MAX_SLOTS {
            return None;
        }
        let scope = self.scopes.last_mut()?;
        let slot = match scope.bindings.get(name) {
            Some(Binding::Slot(slot)) => *slot,
            _ => {
                let slot = self.next_slot as u8;
                self.next_slot += 1;
                slot
            }
        };
        scope.bindings.insert(name.to_string(), Binding::Slot(slot));
        Some(slot)
    }

    /// Declare `name` as a variable-table binding in the current scope
    pub fn declare_named(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.insert(name.to_string(), Binding::Named);
        }
    }

    /// Innermost binding of `name`, if any scope declares it
    pub fn resolve(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.bindings.get(name).copied())
    }

    /// Slot holding `name`, if its innermost binding is a slot
    pub fn resolve_slot(&self, name: &str) -> Option<u8> {
        match self.resolve(name)? {
            Binding::Slot(slot) => Some(slot),
            Binding::Named => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_released_on_exit() {
        let mut chain = ScopeChain::new();
        chain.enter();
        assert_eq!(chain.declare_slot("a"), Some(0));
        chain.enter();
        assert_eq!(chain.declare_slot("b"), Some(1));
        assert_eq!(chain.resolve_slot("a"), Some(0));
        chain.exit();
        assert_eq!(chain.resolve_slot("b"), None);
        chain.enter();
        assert_eq!(chain.declare_slot("c"), Some(1));
    }

    #[test]
    fn test_named_shadows_slot() {
        let mut chain = ScopeChain::new();
        chain.enter();
        chain.declare_slot("x");
        chain.enter();
        chain.declare_named("x");
        assert_eq!(chain.resolve("x"), Some(Binding::Named));
        assert_eq!(chain.resolve_slot("x"), None);
        chain.exit();
        assert_eq!(chain.resolve_slot("x"), Some(0));
    }

    #[test]
    fn test_slot_exhaustion() {
        let mut chain = ScopeChain::new();
        chain.enter();
        for i in 0..MAX_SLOTS {
            assert!(chain.declare_slot(&format!("v{}", i)).is_some());
        }
        assert_eq!(chain.free_slots(), 0);
        assert_eq!(chain.declare_slot("overflow"), None);
    }
}
