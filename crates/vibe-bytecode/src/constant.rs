//! Constant pool
//!
//! Holds literal expressions (scalars and literal list/dict displays) that
//! `LOAD_CONST` materializes at runtime. Freshly generated bytecode borrows
//! the expressions from the syntax tree; deserialized bytecode owns them.

use std::borrow::Cow;

use vibe_syntax::Expr;

/// Pool of constant expressions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool<'a> {
    entries: Vec<Cow<'a, Expr>>,
}

impl<'a> ConstantPool<'a> {
    /// Create an empty constant pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a borrowed expression, returning its index
    pub fn add(&mut self, expr: &'a Expr) -> u32 {
        self.push(Cow::Borrowed(expr))
    }

    /// Add an owned expression, returning its index
    pub fn add_owned(&mut self, expr: Expr) -> u32 {
        self.push(Cow::Owned(expr))
    }

    fn push(&mut self, expr: Cow<'a, Expr>) -> u32 {
        // Equal expressions share an entry; pools stay small so a scan is fine.
        if let Some(idx) = self.entries.iter().position(|e| **e == *expr) {
            return idx as u32;
        }
        let idx = self.entries.len() as u32;
        self.entries.push(expr);
        idx
    }

    /// Get constant by index
    #[inline]
    pub fn get(&self, idx: u32) -> Option<&Expr> {
        self.entries.get(idx as usize).map(|e| &**e)
    }

    /// Number of constants
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over constants
    pub fn iter(&self) -> impl Iterator<Item = &Expr> {
        self.entries.iter().map(|e| &**e)
    }

    /// Detach from the syntax tree
    pub fn into_owned(self) -> ConstantPool<'static> {
        ConstantPool {
            entries: self
                .entries
                .into_iter()
                .map(|e| Cow::Owned(e.into_owned()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borrow_then_own() {
        let expr = Expr::List(vec![Expr::int(1), Expr::string("a")]);
        let mut pool = ConstantPool::new();
        let idx = pool.add(&expr);
        assert_eq!(pool.add(&expr), idx);
        let owned = pool.into_owned();
        assert_eq!(owned.get(idx), Some(&expr));
        assert_eq!(owned.len(), 1);
    }
}
