/// mnemon CLI - memory-formation pipeline host.
///
/// Entry point for the mnemon binary. Parses CLI arguments, initializes
/// logging, and dispatches to subcommand handlers.
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Memory-formation pipeline host
#[derive(Parser)]
#[command(name = "mnemon")]
#[command(version)]
#[command(about = "Memory-formation pipeline host")]
#[command(after_help = "\
Quick start:
  1. export GEMINI_API_KEY=...   — credential for the standard profile
  2. mnemon create-memory        — run one training exchange end to end
  3. mnemon run                  — start the host and keep it running")]
struct Cli {
    /// Path to config.toml
    #[arg(
        short = 'c',
        long,
        global = true,
        default_value = "~/.mnemon/config.toml"
    )]
    config: String,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Start the pipeline host and block until shutdown
    Run(commands::RunArgs),
    /// Run one training-mode exchange and persist the formed memory
    CreateMemory(commands::CreateMemoryArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mnemon_core={level},mnemon_cli={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run(args) => commands::run(&cli.config, args).await,
        Commands::CreateMemory(args) => commands::create_memory(&cli.config, args).await,
    }
}
