use anyhow::Result;
use clap::Parser;
use shedit::cli::{AppContext, Cli, Commands};
use shedit::cli_ext::{apply_cmd, completions_cmd, exit::finish_with_exit, run_cmd};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.no_color);

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
        dry_run: cli.dry_run,
    };

    finish_with_exit(dispatch(cli, &ctx).await)
}

async fn dispatch(cli: Cli, ctx: &AppContext) -> Result<()> {
    let config_path = cli.config;

    match cli.command {
        Commands::Init(args) => shedit::infra::config::init(args, ctx),
        Commands::Completions(args) => completions_cmd::run(args, ctx),
        Commands::CheckSyntax(args) => apply_cmd::check_syntax_run(args, ctx),
        Commands::Apply(args) => {
            let cfg = shedit::load_config(config_path.as_deref())?;
            apply_cmd::apply_run(args, ctx, &cfg)
        }
        Commands::Run(args) => {
            let cfg = shedit::load_config(config_path.as_deref())?;
            run_cmd::run(args, ctx, &cfg).await
        }
        Commands::Serve => {
            let cfg = shedit::load_config(config_path.as_deref())?;
            run_cmd::serve(ctx, &cfg).await
        }
    }
}

/// Logs go to stderr; `SHEDIT_LOG` wins over `RUST_LOG`, default `warn`.
fn init_tracing(no_color: bool) {
    let filter = EnvFilter::try_from_env("SHEDIT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .try_init();
}
