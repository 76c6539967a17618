mod logs;

use clap::Parser;
use models::Config;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use verify::RunMode;

/// mirrorctl verifies that a target MongoDB database mirrors a source Azure
/// Cosmos DB database by comparing a sample of documents per collection.
#[derive(Debug, Parser)]
#[command(name = "mirrorctl", version, author)]
struct Mirrorctl {
    /// Path to the YAML/JSON config file.
    #[arg(long)]
    config: std::path::PathBuf,

    /// Run a single collection (must exist in the config).
    #[arg(long, conflicts_with = "all_collections")]
    collection: Option<String>,

    /// List collections from the source and compare those that have config
    /// entries.
    #[arg(long)]
    all_collections: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Mirrorctl::parse();

    let config = match models::load_config(&args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            return ExitCode::from(2);
        }
    };
    if let Err(error) = prepare_directories(&config) {
        eprintln!("failed to prepare output directories: {error}");
        return ExitCode::from(2);
    }
    if let Err(error) = logs::init_logging(&config.logging.main_log) {
        eprintln!("failed to open main log: {error}");
        return ExitCode::from(2);
    }

    tracing::info!(
        config = %args.config.display(),
        source_api = config.cosmos.api.name(),
        collection = args.collection.as_deref().unwrap_or("<none>"),
        all_collections = args.all_collections,
        "starting compare run"
    );
    tracing::info!(
        main_log = %config.logging.main_log.display(),
        mismatch_output_dir = %config.logging.output_dir.display(),
        "logging configured"
    );

    let mode = match args.collection {
        Some(name) => RunMode::Single(name),
        None if args.all_collections => RunMode::AllCollections,
        None => RunMode::Configured,
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; stopping after in-flight work drains");
                cancel.cancel();
            }
        }
    });

    match run_compare(&config, mode, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = ?error, "fatal error");
            ExitCode::from(2)
        }
    }
}

async fn run_compare(
    config: &Config,
    mode: RunMode,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let source = drivers::connect_source(config).await?;
    let target = drivers::connect_target(config).await?;
    verify::run(config, source, target, mode, cancel).await?;
    Ok(())
}

fn prepare_directories(config: &Config) -> std::io::Result<()> {
    std::fs::create_dir_all(&config.logging.output_dir)?;
    if let Some(parent) = config.logging.main_log.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
