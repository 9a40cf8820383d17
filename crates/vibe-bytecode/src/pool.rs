//! Deduplicating string pools

use rustc_hash::FxHashMap;

/// Ordered pool of unique strings.
///
/// Used for both literal text (`EMIT_TEXT`, `LOAD_STRING`) and identifiers
/// (variables, attributes, filters). Inserting a string that is already
/// present returns its existing index.
#[derive(Debug, Clone, Default)]
pub struct InternPool {
    entries: Vec<String>,
    index: FxHashMap<String, u32>,
}

impl InternPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `s` or find its existing entry
    pub fn insert(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.entries.len() as u32;
        self.entries.push(s.to_owned());
        self.index.insert(s.to_owned(), idx);
        idx
    }

    /// Index of `s`, if present
    pub fn find(&self, s: &str) -> Option<u32> {
        self.index.get(s).copied()
    }

    /// Get entry by index
    #[inline]
    pub fn get(&self, idx: u32) -> Option<&str> {
        self.entries.get(idx as usize).map(String::as_str)
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in index order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

impl PartialEq for InternPool {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for InternPool {}

impl FromIterator<String> for InternPool {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut pool = Self::new();
        for s in iter {
            pool.insert(&s);
        }
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_dedup() {
        let mut pool = InternPool::new();
        let a = pool.insert("hello");
        let b = pool.insert("world");
        let c = pool.insert("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(b), Some("world"));
        assert_eq!(pool.find("world"), Some(b));
        assert_eq!(pool.get(7), None);
    }
}
