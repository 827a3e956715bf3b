mod args;
mod setup;

use std::process::ExitCode;
use std::sync::Arc;

use batch::{RemoteBatchClient, SimulatedBatchClient};
use pipeline::{Orchestrator, PipelineConfig, run_status};
use reading_core::{Manifest, RunOutcome, RunSummary};
use storage::Storage;
use tokio_util::sync::CancellationToken;

use crate::args::{Backend, Commands, RunArgs, parse_args};
use crate::setup::SetupError;

#[tokio::main]
async fn main() -> ExitCode {
    let args = parse_args();

    let verbose = matches!(&args.command, Commands::Run(run) if run.verbose);
    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    let result = match args.command {
        Commands::Run(run) => run_batch(run).await,
        Commands::Status { run_id, db } => show_status(&run_id, db.as_deref()).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(2)
        }
    }
}

async fn run_batch(args: RunArgs) -> Result<ExitCode, SetupError> {
    let manifest = setup::load_manifest(&args).await?;
    let db_config = setup::init_db(args.db.as_deref()).await?;
    if !db_config.is_durable() {
        tracing::warn!("Using {}; this run cannot be resumed after exit", db_config.endpoint);
    }
    let storage = setup::open_storage(&args).await?;
    let config = args.pipeline_config();

    let shutdown = CancellationToken::new();
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling outstanding jobs");
            interrupt.cancel();
        }
    });

    let summary = match args.backend {
        Backend::Local => {
            let client = setup::local_backend(&args, &manifest, &storage)?;
            execute(client, storage, config, &manifest, shutdown).await?
        }
        Backend::Simulated => {
            tracing::info!("Using simulated backend; no reader will actually run");
            execute(SimulatedBatchClient::new(), storage, config, &manifest, shutdown).await?
        }
    };

    let json = serde_json::to_string_pretty(&summary)?;
    println!("{json}");
    if let Some(path) = &args.summary_out {
        tokio::fs::write(path, &json)
            .await
            .map_err(|source| SetupError::Io {
                path: path.clone(),
                source,
            })?;
    }

    let clean = matches!(summary.outcome, RunOutcome::Completed) && summary.all_succeeded();
    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn execute<C: RemoteBatchClient>(
    client: C,
    storage: Storage,
    config: PipelineConfig,
    manifest: &Manifest,
    shutdown: CancellationToken,
) -> Result<RunSummary, SetupError> {
    let orchestrator = Orchestrator::new(Arc::new(client), storage, config);
    Ok(orchestrator.run(manifest, shutdown).await?)
}

async fn show_status(run_id: &str, endpoint: Option<&str>) -> Result<ExitCode, SetupError> {
    let db_config = setup::init_db(endpoint).await?;
    if !db_config.is_durable() {
        tracing::warn!("{} holds no state from earlier processes", db_config.endpoint);
    }
    let status = run_status(run_id).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(ExitCode::SUCCESS)
}
