//! Compiled bytecode caches
//!
//! Entries are keyed by template name and validated against the live source
//! checksum on every lookup. A stale entry is reported as a miss and is
//! overwritten by the next store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use vibe_bytecode::{Bytecode, Header, fnv1a64};

use crate::error::EngineResult;

/// Extension of persisted bytecode files
pub const BYTECODE_EXTENSION: &str = "vjbc";

/// Store of compiled templates
pub trait BytecodeCache: Send + Sync {
    /// Bytecode for `name` if present and compiled from exactly `source`
    fn load(&self, name: &str, source: &str) -> EngineResult<Option<Arc<Bytecode<'static>>>>;

    /// Remember `code` for `name`
    fn store(&self, name: &str, code: &Arc<Bytecode<'static>>) -> EngineResult<()>;

    /// Drop every entry
    fn clear(&self) -> EngineResult<()>;
}

impl<T: BytecodeCache + ?Sized> BytecodeCache for Arc<T> {
    fn load(&self, name: &str, source: &str) -> EngineResult<Option<Arc<Bytecode<'static>>>> {
        (**self).load(name, source)
    }

    fn store(&self, name: &str, code: &Arc<Bytecode<'static>>) -> EngineResult<()> {
        (**self).store(name, code)
    }

    fn clear(&self) -> EngineResult<()> {
        (**self).clear()
    }
}

/// Process-local cache of shared containers
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<FxHashMap<String, Arc<Bytecode<'static>>>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl BytecodeCache for MemoryCache {
    fn load(&self, name: &str, source: &str) -> EngineResult<Option<Arc<Bytecode<'static>>>> {
        let entries = self.entries.read();
        match entries.get(name) {
            Some(code) if code.is_fresh(source) => {
                tracing::trace!(name, "bytecode cache hit");
                Ok(Some(code.clone()))
            }
            Some(_) => {
                tracing::trace!(name, "stale bytecode cache entry");
                Ok(None)
            }
            None => {
                tracing::trace!(name, "bytecode cache miss");
                Ok(None)
            }
        }
    }

    fn store(&self, name: &str, code: &Arc<Bytecode<'static>>) -> EngineResult<()> {
        self.entries.write().insert(name.to_string(), code.clone());
        Ok(())
    }

    fn clear(&self) -> EngineResult<()> {
        self.entries.write().clear();
        Ok(())
    }
}

/// Persisted bytecode files under a directory
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    cache_dir: PathBuf,
}

impl DirectoryCache {
    /// Create a cache writing into `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// File holding the bytecode of `name`
    pub fn cache_path(&self, name: &str) -> PathBuf {
        let hash = format!("{:016x}", fnv1a64(name.as_bytes()));
        self.cache_dir
            .join(&hash[..2])
            .join(format!("{}.{}", hash, BYTECODE_EXTENSION))
    }
}

impl BytecodeCache for DirectoryCache {
    fn load(&self, name: &str, source: &str) -> EngineResult<Option<Arc<Bytecode<'static>>>> {
        let path = self.cache_path(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::trace!(name, "bytecode cache miss");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        // Check magic, version and checksum before decoding the body
        let header = match Header::read(&mut bytes.as_slice()) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(name, error = %e, "unreadable bytecode cache entry");
                return Ok(None);
            }
        };
        if !header.is_fresh(source) {
            tracing::trace!(name, "stale bytecode cache entry");
            return Ok(None);
        }

        match Bytecode::from_bytes(&bytes) {
            Ok(code) => {
                tracing::trace!(name, bytes = bytes.len(), "bytecode cache hit");
                Ok(Some(Arc::new(code)))
            }
            Err(e) => {
                tracing::debug!(name, error = %e, "corrupt bytecode cache entry");
                Ok(None)
            }
        }
    }

    fn store(&self, name: &str, code: &Arc<Bytecode<'static>>) -> EngineResult<()> {
        let path = self.cache_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = code.to_bytes()?;
        std::fs::write(&path, &bytes)?;
        tracing::trace!(name, bytes = bytes.len(), path = %path.display(), "stored bytecode");
        Ok(())
    }

    fn clear(&self) -> EngineResult<()> {
        if self.cache_dir.exists() {
            std::fs::remove_dir_all(&self.cache_dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibe_compiler::Compiler;

    fn compile(source: &str) -> Arc<Bytecode<'static>> {
        let ast = vibe_syntax::parse(source).unwrap();
        Arc::new(Compiler::compile(&ast, source).unwrap().into_owned())
    }

    #[test]
    fn test_memory_cache_checks_source() {
        let cache = MemoryCache::new();
        let code = compile("{{ a }}");
        cache.store("t", &code).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.load("t", "{{ a }}").unwrap().is_some());
        assert!(cache.load("t", "{{ b }}").unwrap().is_none());
        assert!(cache.load("u", "{{ a }}").unwrap().is_none());
        cache.clear().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_path_layout() {
        let cache = DirectoryCache::new("/tmp/vibe-cache");
        let path = cache.cache_path("index.html");
        assert!(path.starts_with("/tmp/vibe-cache"));
        assert_eq!(path.extension().unwrap(), BYTECODE_EXTENSION);
        assert_ne!(path, cache.cache_path("other.html"));
    }

    #[test]
    fn test_directory_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DirectoryCache::new(dir.path());
        let source = "{% for x in xs %}{{ x|upper }}{% endfor %}";
        let code = compile(source);
        cache.store("t", &code).unwrap();

        let loaded = cache.load("t", source).unwrap().unwrap();
        assert_eq!(*loaded, *code);
        assert!(cache.load("t", "changed").unwrap().is_none());
    }

    #[test]
    fn test_directory_cache_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DirectoryCache::new(dir.path());
        let path = cache.cache_path("t");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not bytecode").unwrap();
        assert!(cache.load("t", "x").unwrap().is_none());

        cache.clear().unwrap();
        assert!(!dir.path().exists());
    }
}
