//! Disasm command - show the instructions and pools of compiled bytecode.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};
use vibe_jinja::bytecode::{BYTECODE_MAGIC, BYTECODE_VERSION, Bytecode, CompiledMacro, Instruction};
use vibe_jinja::{Engine, EngineConfig};

#[derive(Args, Debug)]
pub struct DisasmCommand {
    /// Bytecode file, or a template source to compile first
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Template source to check the stored checksum against
    #[arg(long)]
    pub source: Option<PathBuf>,
}

/// Machine-readable view of a container
#[derive(Serialize)]
pub struct Listing<'a> {
    version: u32,
    checksum: String,
    fresh: Option<bool>,
    instructions: &'a [Instruction],
    constants: Vec<String>,
    strings: Vec<&'a str>,
    names: Vec<&'a str>,
    macros: &'a [CompiledMacro],
}

impl DisasmCommand {
    pub fn run(self, config: EngineConfig) -> Result<()> {
        let code = load(&self.file, config)?;
        let fresh = match &self.source {
            Some(path) => Some(code.is_fresh(
                &std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
            )),
            None => None,
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&listing(&code, fresh))?);
        } else {
            println!("; checksum {:016x}", code.checksum());
            if let Some(fresh) = fresh {
                println!("; source {}", if fresh { "matches" } else { "changed" });
            }
            print!("{}", code);
        }
        Ok(())
    }
}

/// Read persisted bytecode, compiling `path` first if it is template source
pub fn load(path: &Path, config: EngineConfig) -> Result<Bytecode<'static>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let bytes = if bytes.starts_with(&BYTECODE_MAGIC) {
        bytes
    } else {
        let source = String::from_utf8(bytes)
            .with_context(|| format!("{} is neither bytecode nor UTF-8 text", path.display()))?;
        Engine::with_config(config).compile_to_bytes(&source)?
    };
    Bytecode::from_bytes(&bytes).with_context(|| format!("Invalid bytecode in {}", path.display()))
}

/// JSON listing of `code`
pub fn listing<'a>(code: &'a Bytecode<'static>, fresh: Option<bool>) -> Listing<'a> {
    Listing {
        version: BYTECODE_VERSION,
        checksum: format!("{:016x}", code.checksum()),
        fresh,
        instructions: code.instructions(),
        constants: code.constants().iter().map(|c| format!("{:?}", c)).collect(),
        strings: code.strings().iter().collect(),
        names: code.names().iter().collect(),
        macros: code.macros(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_source_or_bytecode() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("t.html");
        std::fs::write(&source, "{{ name|upper }}").unwrap();

        let from_source = load(&source, EngineConfig::default()).unwrap();
        let compiled = dir.path().join("t.vjbc");
        std::fs::write(&compiled, from_source.to_bytes().unwrap()).unwrap();
        let from_file = load(&compiled, EngineConfig::default()).unwrap();
        assert_eq!(from_source, from_file);
        assert!(from_file.is_fresh("{{ name|upper }}"));
    }

    #[test]
    fn test_json_listing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("t.html");
        std::fs::write(&source, "Hi {{ name }}").unwrap();
        let code = load(&source, EngineConfig::default()).unwrap();

        let json = serde_json::to_value(listing(&code, Some(true))).unwrap();
        assert_eq!(json["version"], BYTECODE_VERSION);
        assert_eq!(json["fresh"], true);
        assert_eq!(json["strings"], serde_json::json!(["Hi "]));
        assert_eq!(json["names"], serde_json::json!(["name"]));
        assert!(json["instructions"].as_array().unwrap().len() >= 3);
    }

    #[test]
    fn test_rejects_binary_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.bin");
        std::fs::write(&path, [0xffu8, 0xfe, 0x00]).unwrap();
        assert!(load(&path, EngineConfig::default()).is_err());
    }
}
