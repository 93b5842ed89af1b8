//! `folio`: one ingestion run from a TOML config.
//!
//! The config path comes from `FOLIO_CONFIG` (default `folio.toml`; a
//! missing default file means built-in settings). Ctrl-C stops discovery,
//! lets in-flight downloads finish and flushes the checkpoint.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use folio_fetch::ReqwestClient;
use folio_ingest::{ArxivSource, FsStore, IngestConfig, Pipeline, StopReason, init_logging};
use tokio::sync::watch;

const DEFAULT_CONFIG: &str = "folio.toml";

fn load_config() -> anyhow::Result<IngestConfig> {
    let explicit = std::env::var_os("FOLIO_CONFIG").map(PathBuf::from);
    let path = explicit.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let mut config = if explicit.is_some() || path.exists() {
        IngestConfig::load(&path).with_context(|| format!("loading {}", path.display()))?
    } else {
        IngestConfig::default()
    };
    config.apply_env().context("applying FOLIO_* overrides")?;
    Ok(config)
}

async fn run() -> anyhow::Result<StopReason> {
    let config = load_config()?;
    init_logging(&config.logging.level, config.logging.format)?;

    let query = config.query(chrono::Utc::now())?;
    let client = Arc::new(
        ReqwestClient::new(&config.download.user_agent, config.request_timeout())
            .context("building HTTP client")?,
    );
    let source = Arc::new(ArxivSource::new(Arc::clone(&client)));
    let store = Arc::new(FsStore::new(&config.storage.records_dir));
    let pipeline = Pipeline::new(config, query, source, client, store)?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight work");
            let _ = cancel_tx.send(true);
        }
    });

    let summary = pipeline.run(cancel_rx).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary.stop_reason)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(StopReason::Exhausted | StopReason::ResultCapReached | StopReason::Cancelled) => {
            ExitCode::SUCCESS
        }
        // partial run: resumable, but the caller should know
        Ok(_) => ExitCode::from(2),
        Err(e) => {
            eprintln!("folio: {e:#}");
            ExitCode::FAILURE
        }
    }
}
