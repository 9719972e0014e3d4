use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(version, about = "Inspect stage-gated generation pipelines from their history log")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show per-stage status and the overall pipeline status
    Status {
        /// JSON array of history records
        #[arg(long)]
        histories: PathBuf,
    },
    /// Show the gate decision for a stage
    Gate {
        /// Stage to gate: analyze, prisma, interface, test, realize
        stage: String,
        #[arg(long)]
        histories: PathBuf,
    },
    /// Print or write the output file projection
    Files {
        #[arg(long)]
        histories: PathBuf,
        /// Write files under this directory instead of listing them
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the facade system prompt for the current state
    Prompt {
        #[arg(long)]
        histories: PathBuf,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default pipewright.toml file
    Init,
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("PIPEWRIGHT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // Another subscriber may already be installed when embedded.
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Status { histories } => cmd::cmd_status(histories)?,
        Commands::Gate { stage, histories } => cmd::cmd_gate(stage, histories)?,
        Commands::Files { histories, out } => cmd::cmd_files(histories, out.as_deref())?,
        Commands::Prompt { histories } => cmd::cmd_prompt(&project_dir, histories)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
