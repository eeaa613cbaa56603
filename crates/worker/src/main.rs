use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use mediaflow_infra::MediaflowConfig;
use mediaflow_worker::Worker;

/// Media-processing worker: one JSON queue message per input line.
#[derive(Parser, Debug)]
#[command(name = "mediaflow-worker")]
#[command(about = "Process media/document jobs from a JSON-lines queue feed")]
#[command(version)]
struct Cli {
    /// Read messages from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Jobs processed concurrently
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// File of common search queries (one per line) to pre-embed at startup
    #[arg(long)]
    warm_queries: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mediaflow_observability::init();
    let cli = Cli::parse();

    let config = MediaflowConfig::from_env().context("loading configuration")?;
    let worker = Worker::build(&config).await?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("shutdown requested");
            shutdown.cancel();
        }
    });

    let quota_reset = worker.spawn_quota_reset(config.quota_reset_interval, cancel.clone());

    if let Some(path) = &cli.warm_queries {
        let queries = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        worker.warm_queries(queries.lines()).await;
    }

    let stdout = tokio::io::stdout();
    let stats = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            worker
                .run(BufReader::new(file), stdout, cli.concurrency, cancel.clone())
                .await?
        }
        None => {
            worker
                .run(BufReader::new(tokio::io::stdin()), stdout, cli.concurrency, cancel.clone())
                .await?
        }
    };

    cancel.cancel();
    if let Some(handle) = quota_reset {
        let _ = handle.await;
    }

    let health = worker.cache().health_status();
    tracing::info!(
        messages = stats.messages,
        completed = stats.completed,
        failed = stats.failed,
        skipped = stats.skipped,
        cache_status = ?health.status,
        "worker finished"
    );
    Ok(())
}
