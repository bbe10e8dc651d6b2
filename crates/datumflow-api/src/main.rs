//! Datumflow CLI entry point.
//!
//! Binary name: `dflow`
//!
//! Parses arguments, loads `config.toml` from the data directory, sets up
//! tracing and dispatches to the command handlers.

mod cli;

use clap::Parser;
use clap_complete::generate;

use cli::pipeline::Output;
use cli::{Cli, Commands};
use datumflow_core::config::{load_global_config, resolve_data_dir};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,datumflow_core=debug",
        _ => "trace",
    };

    // Shell completions need neither config nor tracing.
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "dflow", &mut std::io::stdout());
        return Ok(());
    }

    // Config decides whether OpenTelemetry is bridged, so load it under a
    // temporary subscriber to keep its warnings visible.
    let data_dir = resolve_data_dir();
    let config = {
        let bootstrap = tracing_subscriber::fmt()
            .with_env_filter(datumflow_observe::tracing_setup::env_filter(filter))
            .with_writer(std::io::stderr)
            .with_target(false)
            .finish();
        let _guard = tracing::subscriber::set_default(bootstrap);
        load_global_config(&data_dir).await
    };

    datumflow_observe::tracing_setup::init_tracing(filter, config.logging.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
    tracing::debug!(data_dir = %data_dir.display(), "configuration loaded");

    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    let result = match &cli.command {
        Commands::Plan { file } => cli::pipeline::handle_plan(file, &config, out).await,
        Commands::Validate { file } => cli::pipeline::handle_validate(file, out).await,
        Commands::Completions { .. } => Ok(()),
    };

    datumflow_observe::tracing_setup::shutdown_tracing();
    result
}
