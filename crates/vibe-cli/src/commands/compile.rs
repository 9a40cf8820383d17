//! Compile command - write the bytecode of a template to a file.
//!
//! Usage:
//! - `vibe compile page.html` - writes `page.vjbc` next to the source
//! - `vibe compile page.html -o build/page.vjbc`

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use vibe_jinja::cache::BYTECODE_EXTENSION;
use vibe_jinja::compiler::policy;
use vibe_jinja::{Engine, EngineConfig};

#[derive(Args, Debug)]
pub struct CompileCommand {
    /// Template file
    pub template: PathBuf,

    /// Output file (default: template path with a .vjbc extension)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

impl CompileCommand {
    pub fn run(self, config: EngineConfig) -> Result<()> {
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| default_output(&self.template));
        let size = compile_file(&self.template, &output, config)?;
        eprintln!("Wrote {} ({} bytes)", output.display(), size);
        Ok(())
    }
}

/// Source path with the bytecode extension
pub fn default_output(template: &Path) -> PathBuf {
    template.with_extension(BYTECODE_EXTENSION)
}

/// Compile `template` into `output`, returning the number of bytes written
pub fn compile_file(template: &Path, output: &Path, config: EngineConfig) -> Result<usize> {
    let source = std::fs::read_to_string(template)
        .with_context(|| format!("Failed to read {}", template.display()))?;

    let options = config.lexer_options();
    let ast = vibe_jinja::syntax::parse_with_options(&source, &options)
        .map_err(|e| anyhow::anyhow!("{}: {}", template.display(), e))?;
    if let Some(reason) = policy::fallback_reason(&ast) {
        tracing::warn!(
            template = %template.display(),
            reason,
            "template uses a construct the bytecode backend skips"
        );
    }

    let bytes = Engine::with_config(config).compile_to_bytes(&source)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibe_jinja::bytecode::Bytecode;

    #[test]
    fn test_default_output() {
        assert_eq!(
            default_output(Path::new("views/page.html")),
            PathBuf::from("views/page.vjbc")
        );
    }

    #[test]
    fn test_compile_file() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("page.html");
        let source = "{% if x %}{{ x|upper }}{% endif %}";
        std::fs::write(&template, source).unwrap();
        let output = dir.path().join("out").join("page.vjbc");

        let size = compile_file(&template, &output, EngineConfig::default()).unwrap();
        let bytes = std::fs::read(&output).unwrap();
        assert_eq!(bytes.len(), size);
        let code = Bytecode::from_bytes(&bytes).unwrap();
        assert!(code.is_fresh(source));
    }

    #[test]
    fn test_compile_reports_syntax_errors() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("bad.html");
        std::fs::write(&template, "{{ x").unwrap();
        let err = compile_file(&template, &dir.path().join("bad.vjbc"), EngineConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("bad.html"));
    }
}
