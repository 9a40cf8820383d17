//! Template source loaders
//!
//! Supports loading templates from:
//! - An in-memory map filled by the host
//! - A directory on disk, with names as `/`-separated relative paths

use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{EngineError, EngineResult};

/// Source of template text by name
pub trait Loader: Send + Sync {
    /// Fetch the source of `name`, or `None` if this loader does not know it
    fn load(&self, name: &str) -> EngineResult<Option<String>>;
}

/// Templates held in memory
#[derive(Debug, Default)]
pub struct MemoryLoader {
    sources: RwLock<FxHashMap<String, String>>,
}

impl MemoryLoader {
    /// Create an empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template
    pub fn insert(&self, name: impl Into<String>, source: impl Into<String>) {
        self.sources.write().insert(name.into(), source.into());
    }

    /// Remove a template
    pub fn remove(&self, name: &str) -> Option<String> {
        self.sources.write().remove(name)
    }
}

impl<N: Into<String>, S: Into<String>> FromIterator<(N, S)> for MemoryLoader {
    fn from_iter<I: IntoIterator<Item = (N, S)>>(iter: I) -> Self {
        let sources = iter
            .into_iter()
            .map(|(n, s)| (n.into(), s.into()))
            .collect();
        Self {
            sources: RwLock::new(sources),
        }
    }
}

impl Loader for MemoryLoader {
    fn load(&self, name: &str) -> EngineResult<Option<String>> {
        Ok(self.sources.read().get(name).cloned())
    }
}

/// Templates read from a root directory
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    root: PathBuf,
}

impl FileSystemLoader {
    /// Create a loader rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a template name to a path below the root.
    ///
    /// Names that would escape the root (`..`, absolute paths) resolve to
    /// nothing.
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name);
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(path)
    }
}

impl Loader for FileSystemLoader {
    fn load(&self, name: &str) -> EngineResult<Option<String>> {
        let Some(path) = self.resolve(name) else {
            tracing::debug!(name, "rejected template path outside loader root");
            return Ok(None);
        };
        match std::fs::read_to_string(&path) {
            Ok(source) => Ok(Some(source)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Io(e)),
        }
    }
}

/// Tries each loader in turn
#[derive(Default)]
pub struct ChainLoader {
    loaders: Vec<Box<dyn Loader>>,
}

impl ChainLoader {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a loader consulted after the existing ones
    pub fn push(mut self, loader: impl Loader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }
}

impl Loader for ChainLoader {
    fn load(&self, name: &str) -> EngineResult<Option<String>> {
        for loader in &self.loaders {
            if let Some(source) = loader.load(name)? {
                return Ok(Some(source));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_loader() {
        let loader: MemoryLoader = [("a", "A")].into_iter().collect();
        assert_eq!(loader.load("a").unwrap().as_deref(), Some("A"));
        assert_eq!(loader.load("b").unwrap(), None);
        loader.insert("b", "B");
        assert_eq!(loader.load("b").unwrap().as_deref(), Some("B"));
        assert_eq!(loader.remove("a").as_deref(), Some("A"));
        assert_eq!(loader.load("a").unwrap(), None);
    }

    #[test]
    fn test_filesystem_loader() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("partials")).unwrap();
        std::fs::write(dir.path().join("partials/row.html"), "<tr>").unwrap();

        let loader = FileSystemLoader::new(dir.path());
        assert_eq!(
            loader.load("partials/row.html").unwrap().as_deref(),
            Some("<tr>")
        );
        assert_eq!(loader.load("./partials/row.html").unwrap().as_deref(), Some("<tr>"));
        assert_eq!(loader.load("missing.html").unwrap(), None);
    }

    #[test]
    fn test_filesystem_loader_stays_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "x").unwrap();

        let loader = FileSystemLoader::new(&root);
        assert_eq!(loader.load("../secret.txt").unwrap(), None);
        let absolute = dir.path().join("secret.txt");
        assert_eq!(loader.load(absolute.to_str().unwrap()).unwrap(), None);
    }

    #[test]
    fn test_chain_loader_order() {
        let first: MemoryLoader = [("a", "first")].into_iter().collect();
        let second: MemoryLoader = [("a", "second"), ("b", "second")].into_iter().collect();
        let chain = ChainLoader::new().push(first).push(second);
        assert_eq!(chain.load("a").unwrap().as_deref(), Some("first"));
        assert_eq!(chain.load("b").unwrap().as_deref(), Some("second"));
        assert_eq!(chain.load("c").unwrap(), None);
    }
}
