//! `logsift` binary.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use logsift_cli::cli::{Cli, Commands};
use logsift_cli::commands::{
    load_config, InfoCommand, IngestCommand, QueryCommand, TypesCommand,
};
use logsift_cli::output::OutputFormat;

fn main() -> ExitCode {
    // RUST_LOG controls verbosity; stdout stays reserved for command output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = tokio::runtime::Runtime::new()
        .map_err(logsift_cli::CliError::from)
        .and_then(|runtime| runtime.block_on(run(cli)));

    if let Err(e) = result {
        eprintln!("logsift: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> Result<(), logsift_cli::CliError> {
    let format = OutputFormat::new(cli.format);
    let config = load_config(cli.config.as_deref())?;
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::Ingest(args) => {
            let cmd = IngestCommand::new(&cli.store, &config);
            cmd.execute(&mut stdout, &format, &args).await?;
        }
        Commands::Query(args) => {
            let cmd = QueryCommand::new(&cli.store, &config);
            cmd.execute(&mut stdout, &format, &args).await?;
        }
        Commands::Types => {
            let cmd = TypesCommand::new(&cli.store, &config);
            cmd.execute(&mut stdout, &format).await?;
        }
        Commands::Info => {
            let cmd = InfoCommand::new(&cli.store, &config);
            cmd.execute(&mut stdout, &format).await?;
        }
    }

    Ok(())
}
