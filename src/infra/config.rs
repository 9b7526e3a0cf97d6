use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};

/// Config file names looked up in the working directory, in priority order
const CONFIG_FILES: [&str; 4] = ["shedit.toml", "shedit.yaml", "shedit.json", ".shedit.toml"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Process session settings
    pub process: ProcessConfig,

    /// Search/replace settings
    pub edit: EditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig
{
    /// Shell used when a request names none (platform default if unset)
    pub default_shell: Option<String>,

    /// Timeout for the initial wait of `start_process`
    pub default_timeout_ms: u64,

    /// Completed sessions retained for post-mortem reads (FIFO eviction)
    pub max_completed: usize,

    /// Optional age limit for completed sessions
    pub completed_ttl_secs: Option<u64>,

    /// Extra regexes recognized as interactive prompts
    pub prompt_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig
{
    /// Minimum similarity for accepting a fuzzy match
    pub fuzzy_threshold: f64,

    /// Search text ceiling in bytes
    pub max_pattern_bytes: usize,

    /// Longest search text (in chars) the fuzzy fallback will attempt
    pub max_fuzzy_chars: usize,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self { process: ProcessConfig::default(), edit: EditConfig::default() }
    }
}

impl Default for ProcessConfig
{
    fn default() -> Self
    {
        Self {
            default_shell: None,
            default_timeout_ms: 30_000,
            max_completed: 100,
            completed_ttl_secs: None,
            prompt_patterns: Vec::new(),
        }
    }
}

impl Default for EditConfig
{
    fn default() -> Self
    {
        Self {
            fuzzy_threshold: crate::core::fuzzy::DEFAULT_THRESHOLD,
            max_pattern_bytes: crate::core::patch::DEFAULT_MAX_PATTERN_BYTES,
            max_fuzzy_chars: crate::core::patch::DEFAULT_MAX_FUZZY_CHARS,
        }
    }
}

/// Load layered configuration: explicit file (or the first config file found
/// in the working directory), then `SHEDIT_*` environment variables.
pub fn load_config(explicit: Option<&Path>) -> Result<Config>
{
    let mut builder = config::Config::builder();

    if let Some(path) = explicit
    {
        builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
    }
    else
    {
        for path in &CONFIG_FILES
        {
            if Path::new(path).exists()
            {
                builder = builder.add_source(config::File::with_name(path));
                break;
            }
        }
    }

    // SHEDIT_PROCESS__DEFAULT_TIMEOUT_MS=5000 style overrides
    builder = builder.add_source(
        config::Environment::with_prefix("SHEDIT")
            .prefix_separator("_")
            .separator("__"),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path: PathBuf = args
        .path
        .join(CONFIG_FILES[0]);

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml()
    {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();

        assert_eq!(back.process.max_completed, 100);
        assert_eq!(back.edit.max_pattern_bytes, 100 * 1024);
        assert!((back.edit.fuzzy_threshold - 0.70).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_file_keeps_defaults()
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("shedit.toml");
        std::fs::write(&path, "[process]\ndefault_timeout_ms = 1500\n").unwrap();

        let cfg = load_config(Some(&path)).unwrap();

        assert_eq!(cfg.process.default_timeout_ms, 1500);
        assert_eq!(cfg.process.max_completed, 100);
        assert!(cfg.process.prompt_patterns.is_empty());
    }
}
