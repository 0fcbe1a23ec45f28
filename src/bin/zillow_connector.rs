use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use zillow_connector::app::{Phases, Pipeline, ProgressSink};
use zillow_connector::config::ConfigLoader;
use zillow_connector::error::ConnectorError;
use zillow_connector::output::{ConsoleOutput, JsonOutput};

#[derive(Parser)]
#[command(name = "zillow-connector")]
#[command(about = "Fetch Zillow Research CSVs and publish them as long-format tables")]
#[command(version)]
struct Cli {
    #[arg(long, help = "Only fetch raw files")]
    ingest_only: bool,

    #[arg(long, help = "Only transform existing raw files")]
    transform_only: bool,

    #[arg(long, help = "Print a JSON run summary instead of progress lines")]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ConnectorError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ConnectorError) -> u8 {
    match error {
        ConnectorError::MissingEnv { .. }
        | ConnectorError::InvalidEnv { .. }
        | ConnectorError::UnknownBackend(_) => 2,
        ConnectorError::Http(_)
        | ConnectorError::HttpStatus { .. }
        | ConnectorError::ObjectStore(_)
        | ConnectorError::ObjectStoreStatus { .. } => 3,
        ConnectorError::SlicesFailed { .. } | ConnectorError::Validation(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if dotenvy::dotenv().is_ok() {
        tracing::debug!("loaded .env");
    }

    let settings = ConfigLoader::from_env()?;
    let pipeline = Pipeline::from_settings(settings)?;
    let phases = Phases::from_flags(cli.ingest_only, cli.transform_only);

    let progress: &dyn ProgressSink = if cli.json { &JsonOutput } else { &ConsoleOutput };
    let summary = pipeline.run(phases, progress)?;
    if cli.json {
        JsonOutput::print_summary(&summary).map_err(|err| miette::miette!("{err}"))?;
    }
    summary.check()?;
    Ok(())
}
