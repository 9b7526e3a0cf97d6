//! `shed apply` and `shed check-syntax` handlers.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use tabled::{Table, Tabled};
use tracing::instrument;

use crate::cli::{AppContext, ApplyArgs, CheckSyntaxArgs};
use crate::cli_ext::exit::CliError;
use crate::core::edit_block::parse_edit_blocks;
use crate::core::patch::{ApplyReport, OperationStatus, PatchConfig, PatchExecutor};
use crate::infra::config::Config;
use crate::infra::io::resolve_user_path;

#[instrument(skip_all)]
pub fn apply_run(
    args: ApplyArgs,
    ctx: &AppContext,
    cfg: &Config,
) -> Result<()>
{
    let raw = if let Some(file_path) = &args.edit_file
    {
        fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read edit file: {}", file_path.display()))?
    }
    else if args.from_clipboard
    {
        get_clipboard_content()?
    }
    else
    {
        return Err(CliError::InvalidInput(
            "Must specify either EDIT_FILE or --from-clipboard".to_string(),
        )
        .into());
    };

    let doc = parse_edit_blocks(&raw);
    if doc.block_count() == 0
    {
        return Err(CliError::InvalidInput("No edit blocks found".to_string()).into());
    }

    let base_dir = dunce::canonicalize(&args.base_dir).map_err(|e| {
        CliError::InvalidInput(format!("Base directory {}: {e}", args.base_dir.display()))
    })?;
    let patch = PatchConfig::from_config(&cfg.edit, base_dir).with_force_dry_run(ctx.dry_run);
    let report = PatchExecutor::new(patch).apply_document(&doc);

    if args.json
    {
        let line = serde_json::to_string(&report)
            .map_err(|e| CliError::Internal(format!("JSON serialization failed: {e}")))?;
        println!("{line}");
    }
    else if !ctx.quiet
    {
        print_report(&report, ctx);
    }

    let skipped = report.skipped_count();
    if skipped > 0
    {
        return Err(CliError::Skipped { skipped, total: report.results.len() }.into());
    }

    Ok(())
}

#[derive(Tabled)]
struct ResultRow
{
    #[tabled(rename = "#")]
    index: usize,
    line: usize,
    file: String,
    status: String,
    matched: usize,
    note: String,
}

fn print_report(
    report: &ApplyReport,
    ctx: &AppContext,
)
{
    let rows: Vec<ResultRow> = report
        .results
        .iter()
        .map(|r| {
            let label = match (r.status, r.dry_run)
            {
                (OperationStatus::Applied, false) => "applied",
                (OperationStatus::Applied, true) => "dry-run",
                (OperationStatus::Skipped, _) => "skipped",
            };
            let status = if ctx.no_color
            {
                label.to_string()
            }
            else if r.status == OperationStatus::Applied
            {
                label.green().to_string()
            }
            else
            {
                label.red().to_string()
            };

            let note = match (&r.reason, &r.warning)
            {
                (Some(reason), _) => reason.to_string(),
                (None, Some(warning)) => warning.clone(),
                (None, None) => String::new(),
            };

            ResultRow {
                index: r.index,
                line: r.line,
                file: r
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string()),
                status,
                matched: r.matched,
                note,
            }
        })
        .collect();

    println!("{}", Table::new(rows));

    let summary = format!(
        "{} applied, {} skipped, {} files written",
        report.applied_count(),
        report.skipped_count(),
        report.files_written.len()
    );
    if ctx.no_color
    {
        println!("{summary}");
    }
    else if report.skipped_count() == 0
    {
        println!("{}", summary.green());
    }
    else
    {
        println!("{}", summary.yellow());
    }
}

#[instrument(skip_all)]
pub fn check_syntax_run(
    args: CheckSyntaxArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let input = fs::read_to_string(&args.edit_file)
        .with_context(|| format!("Failed to read edit file: {}", args.edit_file.display()))?;

    if ctx.no_color
    {
        // Only fails when a hook is already installed
        let _ = miette::set_hook(Box::new(|_| {
            Box::new(
                miette::MietteHandlerOpts::new()
                    .color(false)
                    .build(),
            )
        }));
    }

    let doc = parse_edit_blocks(&input);

    if !doc.malformed.is_empty()
    {
        for block in &doc.malformed
        {
            let report = miette::Report::new(block.diagnostic(&doc.source));
            eprintln!("{report:?}");
        }
        return Err(CliError::InvalidInput(format!(
            "{} of {} edit blocks are malformed",
            doc.malformed.len(),
            doc.block_count()
        ))
        .into());
    }

    if doc.block_count() == 0
    {
        return Err(CliError::InvalidInput("No edit blocks found".to_string()).into());
    }

    let files: BTreeSet<_> = doc
        .operations
        .iter()
        .map(|op| op.file_path.clone())
        .collect();

    if !ctx.quiet
    {
        println!("Edit syntax is valid");
        println!("   {} blocks targeting {} files", doc.block_count(), files.len());
    }

    let missing: Vec<_> = files
        .iter()
        .filter(|p| !resolve_user_path(p, Path::new(".")).exists())
        .collect();

    if !missing.is_empty() && !ctx.quiet
    {
        println!("Referenced files not found:");
        for file in missing
        {
            println!("   • {}", file.display());
        }
    }

    Ok(())
}

fn get_clipboard_content() -> Result<String>
{
    use arboard::Clipboard;
    let mut clipboard = Clipboard::new().context("Failed to access clipboard")?;
    clipboard
        .get_text()
        .context("Failed to get text from clipboard")
}
