use clap::{ArgGroup, Parser};
use plant_seal::ClientConfig;
use plant_seal::client::{SessionStatus, TransmitSession};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plant-seal")]
#[command(about = "Encrypt a payload and upload it to the plant ingestion service")]
#[command(version)]
#[command(group(ArgGroup::new("payload").required(true).args(["size", "file", "document"])))]
struct Cli {
    /// Bearer token issued at plant login
    #[arg(long, env = "PLANT_SEAL_TOKEN", hide_env_values = true)]
    token: String,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Send a synthetic payload of this many bytes
    #[arg(long)]
    size: Option<usize>,

    /// Send the contents of this file
    #[arg(long)]
    file: Option<PathBuf>,

    /// Send this JSON document
    #[arg(long, requires = "data_type")]
    document: Option<String>,

    /// Label for --document (production_order, inventory, quality_report, ...)
    #[arg(long)]
    data_type: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("plant-seal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> plant_seal::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    }
    .from_env()?;

    let mut session = TransmitSession::connect(&config, &cli.token).await?;
    println!("Plant: {} (unverified)", session.credential().identity());

    if let Some(size) = cli.size {
        session.select_size(size)?;
    } else if let Some(path) = cli.file {
        session.select_file(path)?;
    } else if let (Some(body), Some(data_type)) = (cli.document, cli.data_type) {
        session.select_document(data_type, body)?;
    }

    let status = tokio::select! {
        status = session.transmit() => status?,
        _ = tokio::signal::ctrl_c() => {
            session.abort();
            eprintln!("Cancelled.");
            return Ok(ExitCode::FAILURE);
        }
    };

    match status {
        SessionStatus::Success(metrics) => {
            println!("Transmission succeeded");
            println!("  payload:    {} bytes", metrics.payload_bytes);
            println!("  overhead:   {} bytes", metrics.overhead_bytes());
            println!("  encryption: {:.2?}", metrics.encryption);
            println!("  total:      {:.2?}", metrics.total);
            Ok(ExitCode::SUCCESS)
        }
        SessionStatus::Error(failure) => {
            eprintln!("Transmission failed ({:?}): {}", failure.cause, failure.message);
            Ok(ExitCode::FAILURE)
        }
        other => {
            eprintln!("Transmission ended in state {}", other.name());
            Ok(ExitCode::FAILURE)
        }
    }
}
