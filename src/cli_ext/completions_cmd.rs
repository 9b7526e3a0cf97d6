//! `shed completions` handler.

use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Generator, Shell};

use crate::cli::{AppContext, Cli, CompletionsArgs};
use crate::infra::io::write_atomic;

/// Name the scripts complete for
const BIN_NAME: &str = "shed";

/// Completion script for `shell` as bytes.
pub fn render(shell: Shell) -> Vec<u8>
{
    let mut cmd = Cli::command();
    let mut buf = Vec::new();
    clap_complete::generate(shell, &mut cmd, BIN_NAME, &mut buf);
    buf
}

pub fn run(
    args: CompletionsArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let script = render(args.shell);

    let Some(dir) = args.out_dir
    else
    {
        std::io::stdout()
            .write_all(&script)
            .context("write completion script")?;
        return Ok(());
    };

    let path = dir.join(args.shell.file_name(BIN_NAME));

    if ctx.dry_run
    {
        eprintln!("Would write {} ({} bytes)", path.display(), script.len());
        return Ok(());
    }

    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    write_atomic(&path, &script)?;

    if !ctx.quiet
    {
        eprintln!("Wrote {} completion to {}", args.shell, path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn ctx(dry_run: bool) -> AppContext
    {
        AppContext {
            quiet: true,
            no_color: true,
            dry_run,
        }
    }

    #[test]
    fn every_shell_script_names_the_binary()
    {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish, Shell::PowerShell, Shell::Elvish]
        {
            let text = String::from_utf8(render(shell)).expect("scripts are UTF-8");
            assert!(text.contains(BIN_NAME), "{shell} script lacks the binary name");
        }
    }

    #[test]
    fn out_dir_receives_shell_named_file()
    {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("completions");
        let args = CompletionsArgs {
            shell: Shell::Zsh,
            out_dir: Some(dir.clone()),
        };

        run(args, &ctx(false)).unwrap();

        let written = fs::read(dir.join("_shed")).unwrap();
        assert_eq!(written, render(Shell::Zsh));
    }

    #[test]
    fn dry_run_writes_nothing()
    {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("completions");
        let args = CompletionsArgs {
            shell: Shell::Bash,
            out_dir: Some(dir.clone()),
        };

        run(args, &ctx(true)).unwrap();

        assert!(!dir.exists());
    }
}
