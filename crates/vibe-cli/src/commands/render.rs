//! Render command - render a template file to stdout.
//!
//! Usage:
//! - `vibe render page.html --context '{"user": "Ann"}'`
//! - `vibe render page.html --context @data.json`
//! - `vibe render page.vjbc` - run previously compiled bytecode

use anyhow::{Context, Result, bail};
use clap::Args;
use std::io::Write;
use std::path::{Path, PathBuf};
use vibe_jinja::bytecode::BYTECODE_MAGIC;
use vibe_jinja::{Engine, EngineConfig, FileSystemLoader, ValueMap, to_context};

#[derive(Args, Debug)]
pub struct RenderCommand {
    /// Template file
    pub template: PathBuf,

    /// Context as a JSON object, or @path to read it from a file
    #[arg(short, long)]
    pub context: Option<String>,

    /// Write output to a file instead of stdout
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// HTML-escape output (overrides config)
    #[arg(long)]
    pub autoescape: bool,
}

impl RenderCommand {
    pub fn run(self, mut config: EngineConfig) -> Result<()> {
        if self.autoescape {
            config.autoescape = true;
        }
        let context = parse_context(self.context.as_deref())?;
        let output = render_file(&self.template, config, &context)?;

        match &self.output {
            Some(path) => std::fs::write(path, &output)
                .with_context(|| format!("Failed to write {}", path.display()))?,
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(output.as_bytes())?;
                stdout.flush()?;
            }
        }
        Ok(())
    }
}

/// Render `path` with a loader rooted at its directory.
///
/// Files starting with the bytecode magic are executed directly.
pub fn render_file(path: &Path, config: EngineConfig, context: &ValueMap) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut engine = Engine::with_config(config);

    if bytes.starts_with(&BYTECODE_MAGIC) {
        let template = engine.template_from_bytes(&path.display().to_string(), &bytes)?;
        return Ok(template.render_map(context)?);
    }

    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        bail!("Invalid template path: {}", path.display());
    };
    let root = path.parent().unwrap_or(Path::new("."));
    engine.set_loader(FileSystemLoader::new(root));
    let template = engine.get_template(name)?;
    tracing::debug!(template = name, bytecode = template.bytecode().is_some(), "rendering");
    Ok(template.render_map(context)?)
}

/// Parse `--context`: inline JSON or `@file`
pub fn parse_context(arg: Option<&str>) -> Result<ValueMap> {
    let Some(arg) = arg else {
        return Ok(ValueMap::new());
    };
    let text = match arg.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?
        }
        None => arg.to_string(),
    };
    let json: serde_json::Value =
        serde_json::from_str(&text).context("Context is not valid JSON")?;
    Ok(to_context(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibe_jinja::Value;

    #[test]
    fn test_parse_context_inline() {
        let ctx = parse_context(Some(r#"{"a": 1, "b": [true]}"#)).unwrap();
        assert_eq!(ctx.get("a"), Some(&Value::Int(1)));
        assert!(parse_context(None).unwrap().is_empty());
        assert!(parse_context(Some("[1]")).is_err());
        assert!(parse_context(Some("{")).is_err());
    }

    #[test]
    fn test_parse_context_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.json");
        std::fs::write(&path, r#"{"name": "Ann"}"#).unwrap();
        let ctx = parse_context(Some(&format!("@{}", path.display()))).unwrap();
        assert_eq!(ctx.get("name"), Some(&Value::from("Ann")));
    }

    #[test]
    fn test_render_source_and_bytecode() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("page.html");
        std::fs::write(&source, "{% for x in xs %}<{{ x }}>{% endfor %}").unwrap();
        let ctx = parse_context(Some(r#"{"xs": ["a", "b"]}"#)).unwrap();

        let out = render_file(&source, EngineConfig::default(), &ctx).unwrap();
        assert_eq!(out, "<a><b>");

        let engine = Engine::new();
        let bytes = engine
            .compile_to_bytes(&std::fs::read_to_string(&source).unwrap())
            .unwrap();
        let compiled = dir.path().join("page.vjbc");
        std::fs::write(&compiled, bytes).unwrap();
        let out = render_file(&compiled, EngineConfig::default(), &ctx).unwrap();
        assert_eq!(out, "<a><b>");
    }

    #[test]
    fn test_render_autoescape() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("t.html");
        std::fs::write(&source, "{{ v }}").unwrap();
        let ctx = parse_context(Some(r#"{"v": "<i>"}"#)).unwrap();
        let config = EngineConfig {
            autoescape: true,
            ..EngineConfig::default()
        };
        assert_eq!(render_file(&source, config, &ctx).unwrap(), "&lt;i&gt;");
    }
}
