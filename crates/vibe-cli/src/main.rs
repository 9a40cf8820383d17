//! vibe - render, compile and disassemble vibe-jinja templates.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "vibe",
    version,
    about = "Jinja-style templates on a bytecode VM",
    long_about = "Render templates, or compile them to bytecode and inspect the result.\n\n\
                  Render:       vibe render page.html --context '{\"name\": \"Ann\"}'\n\
                  Compile:      vibe compile page.html -o page.vjbc\n\
                  Disassemble:  vibe disasm page.vjbc"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (default: nearest vibe.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template to stdout
    Render(commands::render::RenderCommand),

    /// Compile a template to a bytecode file
    Compile(commands::compile::CompileCommand),

    /// Print the instructions and pools of a bytecode file or template
    Disasm(commands::disasm::DisasmCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.parse()?))
        .init();

    let config = vibe_jinja::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render(cmd) => cmd.run(config),
        Commands::Compile(cmd) => cmd.run(config),
        Commands::Disasm(cmd) => cmd.run(config),
    }
}
