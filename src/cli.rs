use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Shared application context for global flags
#[derive(Clone, Debug)]
pub struct AppContext {
    pub quiet: bool,    // global --quiet
    pub no_color: bool, // global --no-color
    pub dry_run: bool,  // global --dry-run
}

#[derive(Parser)]
#[command(name = "shed")]
#[command(
    about = "Run shell commands as interruptible sessions and apply fuzzy search/replace edit blocks"
)]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress progress spinners and non-essential output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Report what would change without writing files
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Config file (defaults to shedit.toml/.yaml/.json in the working directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a command as a session and print its output
    Run(RunArgs),

    /// Serve JSON tool requests, one per stdin line
    Serve,

    /// Apply search/replace edit blocks to files
    Apply(ApplyArgs),

    /// Validate edit-block syntax without touching files
    CheckSyntax(CheckSyntaxArgs),

    /// Initialize a shedit.toml config file
    Init(InitArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Command line handed to the shell
    pub command: String,

    /// Initial wait before returning (defaults to config `default_timeout_ms`)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Shell to run the command under
    #[arg(long)]
    pub shell: Option<String>,

    /// Keep reading until the process exits
    #[arg(long)]
    pub wait: bool,
}

#[derive(Parser, Debug)]
pub struct ApplyArgs {
    /// Edit-block file to apply
    pub edit_file: Option<PathBuf>,

    /// Read edit blocks from clipboard
    #[arg(long, conflicts_with = "edit_file")]
    pub from_clipboard: bool,

    /// Directory relative edit paths are resolved against
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,

    /// Output results in JSON format (single line)
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct CheckSyntaxArgs {
    /// Edit-block file to validate
    pub edit_file: PathBuf,
}

#[derive(Parser)]
pub struct InitArgs {
    /// Directory to initialize config in
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,

    /// Write the script into this directory instead of stdout
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}
