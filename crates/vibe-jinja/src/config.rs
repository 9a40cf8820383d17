//! Configuration file parsing for vibe.toml.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vibe_syntax::LexerOptions;
use vibe_vm::environment::DEFAULT_MAX_RECURSION;

use crate::error::{EngineError, EngineResult};

/// Config file names searched for, in order
pub const CONFIG_NAMES: &[&str] = &["vibe.toml", ".vibe.toml"];

/// Backend selection mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Bytecode when the template allows it, tree-walk fallback otherwise
    #[default]
    Auto,
    /// Always compile to bytecode; unsupported statements are skipped
    Bytecode,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// HTML-escape output that is not marked safe
    pub autoescape: bool,

    /// Backend selection
    pub backend: BackendMode,

    /// Deepest macro call nesting before rendering fails
    pub max_recursion: usize,

    /// Remove the first newline after a block tag
    pub trim_blocks: bool,

    /// Strip leading spaces and tabs before a block tag
    pub lstrip_blocks: bool,

    /// Keep the final newline of a template
    pub keep_trailing_newline: bool,

    /// Directory for persisted bytecode
    pub cache_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autoescape: false,
            backend: BackendMode::Auto,
            max_recursion: DEFAULT_MAX_RECURSION,
            trim_blocks: false,
            lstrip_blocks: false,
            keep_trailing_newline: false,
            cache_dir: None,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Whitespace handling passed to the lexer
    pub fn lexer_options(&self) -> LexerOptions {
        LexerOptions {
            trim_blocks: self.trim_blocks,
            lstrip_blocks: self.lstrip_blocks,
            keep_trailing_newline: self.keep_trailing_newline,
        }
    }
}

/// Load configuration from a file or search for a default config file.
///
/// A relative `cache_dir` is resolved against the config file's directory.
pub fn load_config(path: Option<&Path>) -> EngineResult<EngineConfig> {
    let config_path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(&std::env::current_dir()?),
    };

    match config_path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let mut config = EngineConfig::from_toml(&content).map_err(|e| EngineError::Config {
                path: path.clone(),
                message: e.to_string(),
            })?;
            if let (Some(dir), Some(base)) = (&config.cache_dir, path.parent())
                && dir.is_relative()
            {
                config.cache_dir = Some(base.join(dir));
            }
            tracing::debug!(path = %path.display(), "loaded engine config");
            Ok(config)
        }
        _ => Ok(EngineConfig::default()),
    }
}

/// Search `start` and its ancestors for a config file.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        CONFIG_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    })
}
