//! **shedit** - Interruptible shell sessions and fuzzy search/replace for AI tooling
//!
//! Commands run as long-lived sessions whose output can be read incrementally,
//! even after they exit. Edit blocks are applied with exact matching first and
//! a similarity-scored fuzzy fallback.

/// Command-line interface with clap integration
pub mod cli;

/// CLI command handlers
pub mod cli_ext {
    /// `apply` and `check-syntax`
    pub mod apply_cmd;

    /// `completions`
    pub mod completions_cmd;

    /// Error taxonomy and exit codes
    pub mod exit;

    /// `run` and `serve`
    pub mod run_cmd;
}

/// Core engines: sessions, reads, fuzzy matching and patching
pub mod core {
    /// Normalized Levenshtein similarity
    pub mod similarity;

    /// Best-window fuzzy locator
    pub mod fuzzy;
    pub use fuzzy::{FuzzyLocator, FuzzyMatch};

    /// SEARCH/REPLACE block parser
    pub mod edit_block;
    pub use edit_block::{EditDocument, EditFlags, EditOperation, MalformedBlock, parse_edit_blocks};

    /// Exact-then-fuzzy patch execution
    pub mod patch;
    pub use patch::{ApplyFailure, ApplyReport, PatchConfig, PatchExecutor};

    /// Interactive prompt heuristics
    pub mod prompt;

    /// Shell spawning and output pumps
    pub mod process;

    /// Pid-keyed session registry
    pub mod session;
    pub use session::{SessionError, SessionRegistry};

    /// Incremental and post-mortem output reads
    pub mod read;
    pub use read::ReadCoordinator;

    /// Typed tool requests and replies
    pub mod tools;
    pub use tools::{ToolReply, ToolRequest, ToolSurface};
}

/// Infrastructure - Configuration, I/O, and utilities
pub mod infra {
    /// Layered configuration with TOML init
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Path resolution and atomic writes
    pub mod io;

    /// Utility functions and helpers for common operations
    pub mod utils;
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli, Commands};
pub use infra::{Config, load_config};
