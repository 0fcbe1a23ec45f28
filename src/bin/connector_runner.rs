use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use zillow_connector::error::ConnectorError;
use zillow_connector::supervisor::{Supervisor, SupervisorConfig};

#[derive(Parser)]
#[command(name = "connector-runner")]
#[command(about = "Run the connector under supervision: tee output, sample memory, upload logs")]
#[command(version)]
struct Cli {
    #[arg(long, help = "Pass --ingest-only to the connector")]
    ingest_only: bool,

    #[arg(long, help = "Pass --transform-only to the connector")]
    transform_only: bool,

    #[arg(long, help = "Connector executable (defaults to zillow-connector next to this binary)")]
    command: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<ConnectorError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &ConnectorError) -> u8 {
    match error {
        ConnectorError::Spawn(_) => 127,
        _ => 1,
    }
}

fn run() -> miette::Result<i32> {
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

    let program = match cli.command {
        Some(program) => program,
        None => default_program().map_err(ConnectorError::Spawn)?,
    };
    let mut args = Vec::new();
    if cli.ingest_only {
        args.push("--ingest-only".to_string());
    }
    if cli.transform_only {
        args.push("--transform-only".to_string());
    }

    let config = SupervisorConfig::from_lookup(|name| std::env::var(name).ok(), program, args);
    let code = Supervisor::new(config).run()?;
    Ok(code)
}

fn default_program() -> Result<PathBuf, String> {
    let current = std::env::current_exe().map_err(|err| err.to_string())?;
    Ok(current.with_file_name(format!("zillow-connector{}", std::env::consts::EXE_SUFFIX)))
}
