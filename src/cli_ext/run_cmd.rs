//! `shed run` and `shed serve` handlers.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, instrument};

use crate::cli::{AppContext, RunArgs};
use crate::core::patch::PatchConfig;
use crate::core::read::format_completion;
use crate::core::session::{SessionEntry, SessionRead, SessionRegistry};
use crate::core::tools::ToolSurface;
use crate::infra::config::Config;
use crate::infra::utils::DisplayUtils;

/// Poll interval while `--wait` follows a session
const FOLLOW_TICK: Duration = Duration::from_millis(250);

#[instrument(skip_all)]
pub async fn run(
    args: RunArgs,
    ctx: &AppContext,
    cfg: &Config,
) -> Result<()>
{
    let registry = SessionRegistry::from_config(&cfg.process)?;
    let timeout = Duration::from_millis(args.timeout_ms.unwrap_or(cfg.process.default_timeout_ms));

    let outcome = registry
        .start_process(&args.command, timeout, args.shell.as_deref())
        .await?;

    print_flush(&outcome.output);

    if !outcome.is_blocked
    {
        if !ctx.quiet
        {
            let status = match outcome.exit_code
            {
                Some(code) => format!("exit code {code}"),
                None => "terminated by a signal".to_string(),
            };
            eprintln!("{}", paint(&format!("[pid {}] {status}", outcome.pid), ctx, false));
        }
        return Ok(());
    }

    if !args.wait
    {
        // Sessions do not outlive the CLI process
        registry
            .kill_session(outcome.pid)
            .await?;
        if !ctx.quiet
        {
            eprintln!(
                "{}",
                paint(
                    &format!(
                        "[pid {}] still running after {}; terminated (use --wait to follow)",
                        outcome.pid,
                        DisplayUtils::runtime(timeout)
                    ),
                    ctx,
                    true,
                )
            );
        }
        return Ok(());
    }

    follow(&registry, outcome.pid, outcome.output.len(), &args.command, ctx).await
}

/// Print new output until the session exits.
async fn follow(
    registry: &SessionRegistry,
    pid: u32,
    mut printed: usize,
    command: &str,
    ctx: &AppContext,
) -> Result<()>
{
    let spinner = if ctx.quiet
    {
        ProgressBar::hidden()
    }
    else
    {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.set_message(DisplayUtils::preview(command, 60));
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    };

    loop
    {
        registry
            .wait_until(pid, tokio::time::Instant::now() + FOLLOW_TICK, |entry| match entry
            {
                SessionEntry::Running(run) => !run.pending_output().is_empty(),
                SessionEntry::Exited(_) => true,
            })
            .await;

        match registry.read(pid)?
        {
            SessionRead::Output(delta) =>
            {
                printed += delta.len();
                spinner.suspend(|| print_flush(&delta));
            }
            SessionRead::Completed(done) =>
            {
                // Tail written between the last drain and the exit
                let tail = done
                    .final_output
                    .get(printed..)
                    .unwrap_or_default();
                spinner.suspend(|| print_flush(tail));
                spinner.finish_and_clear();

                if !ctx.quiet
                {
                    let summary = format_completion(&done);
                    let status = summary
                        .lines()
                        .take(2)
                        .collect::<Vec<_>>()
                        .join(", ");
                    eprintln!("{}", paint(&format!("[pid {pid}] {status}"), ctx, done.exit_code != Some(0)));
                }
                return Ok(());
            }
        }
    }
}

#[instrument(skip_all)]
pub async fn serve(
    ctx: &AppContext,
    cfg: &Config,
) -> Result<()>
{
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let base_dir: PathBuf = dunce::canonicalize(&cwd).unwrap_or(cwd);
    let registry = SessionRegistry::from_config(&cfg.process)?;
    let tools = ToolSurface::new(
        registry,
        PatchConfig::from_config(&cfg.edit, base_dir).with_force_dry_run(ctx.dry_run),
        Duration::from_millis(cfg.process.default_timeout_ms),
    );

    info!("serving tool requests on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read request")?
    {
        if line.trim().is_empty()
        {
            continue;
        }

        let reply = tools.dispatch_line(&line).await;
        let mut text = serde_json::to_string(&reply).context("Failed to encode reply")?;
        text.push('\n');
        stdout
            .write_all(text.as_bytes())
            .await
            .context("Failed to write reply")?;
        stdout.flush().await?;
    }

    tools.registry().kill_all().await;
    Ok(())
}

fn print_flush(text: &str)
{
    if text.is_empty()
    {
        return;
    }
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

fn paint(
    text: &str,
    ctx: &AppContext,
    warn: bool,
) -> String
{
    match (ctx.no_color, warn)
    {
        (true, _) => text.to_string(),
        (false, false) => text.dimmed().to_string(),
        (false, true) => text.yellow().to_string(),
    }
}
