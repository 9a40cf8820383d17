//! Persisted bytecode cache driven through the engine

use std::sync::Arc;

use serde_json::json;
use vibe_jinja::{BytecodeCache, DirectoryCache, Engine, EngineConfig, FileSystemLoader, MemoryCache};

fn cache_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(cache_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}

#[test]
fn test_cache_dir_from_config() {
    let templates = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let source = "{% for i in xs %}{{ i }}{% endfor %}";
    std::fs::write(templates.path().join("list.html"), source).unwrap();

    let config = EngineConfig {
        cache_dir: Some(cache.path().to_path_buf()),
        ..EngineConfig::default()
    };
    let mut engine = Engine::with_config(config.clone());
    engine.set_loader(FileSystemLoader::new(templates.path()));
    assert_eq!(engine.render("list.html", &json!({"xs": [1, 2]})).unwrap(), "12");
    assert_eq!(cache_files(cache.path()).len(), 1);

    // A second engine is served from disk and renders the same output
    let mut warm = Engine::with_config(config);
    warm.set_loader(FileSystemLoader::new(templates.path()));
    let template = warm.get_template("list.html").unwrap();
    let on_disk = warm
        .cache()
        .unwrap()
        .load(&warm.cache_key("list.html"), source)
        .unwrap()
        .unwrap();
    assert_eq!(**template.bytecode().unwrap(), *on_disk);
    assert_eq!(template.render(&json!({"xs": [3]})).unwrap(), "3");
}

#[test]
fn test_stale_entry_is_recompiled() {
    let templates = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let path = templates.path().join("t.html");
    std::fs::write(&path, "old {{ x }}").unwrap();

    let config = EngineConfig {
        cache_dir: Some(cache.path().to_path_buf()),
        ..EngineConfig::default()
    };
    let mut engine = Engine::with_config(config.clone());
    engine.set_loader(FileSystemLoader::new(templates.path()));
    assert_eq!(engine.render("t.html", &json!({"x": 1})).unwrap(), "old 1");

    std::fs::write(&path, "new {{ x }}").unwrap();
    let mut fresh = Engine::with_config(config);
    fresh.set_loader(FileSystemLoader::new(templates.path()));
    assert_eq!(fresh.render("t.html", &json!({"x": 1})).unwrap(), "new 1");

    // The stale file was overwritten in place
    let files = cache_files(cache.path());
    assert_eq!(files.len(), 1);
    let bytes = std::fs::read(&files[0]).unwrap();
    let stored = vibe_jinja::bytecode::Bytecode::from_bytes(&bytes).unwrap();
    assert!(stored.is_fresh("new {{ x }}"));
}

#[test]
fn test_tree_walk_templates_are_not_cached() {
    let cache = tempfile::tempdir().unwrap();
    let engine = Engine::with_config(EngineConfig {
        cache_dir: Some(cache.path().to_path_buf()),
        ..EngineConfig::default()
    });
    engine.add_template("inc", "{% include 'x' %}").unwrap();
    assert!(cache_files(cache.path()).is_empty());
}

#[test]
fn test_memory_cache_shared_between_engines() {
    let cache = Arc::new(MemoryCache::new());

    let mut first = Engine::new();
    first.set_cache(cache.clone());
    let a = first.add_template("t", "{{ 1 }}").unwrap();
    assert_eq!(cache.len(), 1);

    let mut second = Engine::new();
    second.set_cache(cache.clone());
    let b = second.add_template("t", "{{ 1 }}").unwrap();
    assert!(Arc::ptr_eq(a.bytecode().unwrap(), b.bytecode().unwrap()));
}

#[test]
fn test_render_str_bypasses_cache() {
    let cache = tempfile::tempdir().unwrap();
    let engine = Engine::with_config(EngineConfig {
        cache_dir: Some(cache.path().to_path_buf()),
        ..EngineConfig::default()
    });
    assert_eq!(engine.render_str("{{ 2 }}", &()).unwrap(), "2");
    assert!(!cache.path().read_dir().unwrap().any(|_| true));
    let direct = DirectoryCache::new(cache.path());
    assert!(direct.load("<string>", "{{ 2 }}").unwrap().is_none());
}
