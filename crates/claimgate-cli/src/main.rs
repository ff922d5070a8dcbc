//! claimgate CLI - 共有 inbox に対する 1 ワーカー分のポーリングサイクル
//!
//! 同じコマンドを複数のプロセス（または同じディレクトリをマウントした
//! 複数のマシン）から実行すると、各ファイルはそのうち 1 つだけが処理する。

mod scan;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use claimgate_core::impls::FsStore;
use claimgate_core::observability::{ClaimCounts, init_tracing};
use claimgate_core::{CandidateFile, ClaimFilter, ClaimFilterBuilder, Completion, FilterConfig};
use claimgate_core::ports::SystemClock;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "claimgate", about = "Claim-once file processing over a shared store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one poll cycle: scan, claim, process, record outcomes
    Poll {
        /// Directory the remote source is mirrored into
        #[arg(long)]
        inbox: PathBuf,
        /// Directory holding the shared claim store
        #[arg(long)]
        store: PathBuf,
        /// Filter configuration (TOML); CLAIMGATE_* variables override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Simulate a processing failure for files whose name contains this
        #[arg(long)]
        fail_pattern: Option<String>,
    },
    /// Show the stored claim record of a file
    Inspect {
        /// Directory holding the shared claim store
        #[arg(long)]
        store: PathBuf,
        /// Filter configuration (TOML); only the key prefix matters here
        #[arg(long)]
        config: Option<PathBuf>,
        /// File name as seen in the inbox
        name: String,
    },
}

/// poll の結果（標準出力に JSON で出す）
#[derive(Debug, Default, Serialize)]
struct PollSummary {
    worker: String,
    discovered: usize,
    counts: ClaimCounts,
    processed: Vec<String>,
    failed: Vec<String>,
    anomalies: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Poll {
            inbox,
            store,
            config,
            fail_pattern,
        } => cmd_poll(inbox, store, config, fail_pattern).await,
        Command::Inspect {
            store,
            config,
            name,
        } => cmd_inspect(store, config, name).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FilterConfig> {
    let config = match path {
        Some(path) => FilterConfig::from_toml_file(path)?,
        None => FilterConfig::default(),
    };
    Ok(config.apply_env_overrides()?)
}

fn build_filter(
    store: PathBuf,
    config: Option<PathBuf>,
) -> anyhow::Result<ClaimFilter<FsStore, SystemClock>> {
    let config = load_config(config.as_deref())?;
    let filter = ClaimFilterBuilder::new(FsStore::new(store))
        .config(config)
        .build()?;
    Ok(filter)
}

async fn cmd_poll(
    inbox: PathBuf,
    store: PathBuf,
    config: Option<PathBuf>,
    fail_pattern: Option<String>,
) -> anyhow::Result<()> {
    let filter = build_filter(store, config)?;
    let discovered = scan::scan_inbox(&inbox)
        .with_context(|| format!("scanning inbox {}", inbox.display()))?;

    let mut summary = PollSummary {
        worker: filter.worker_id().to_string(),
        discovered: discovered.len(),
        ..PollSummary::default()
    };

    // (A) claim: 上限までこのワーカーが処理するファイルを決める
    let report = filter.evaluate_batch(discovered).await?;
    summary.counts = report.counts;

    // (B) 処理して、結果に関係なく完了を記録する
    for file in report.accepted {
        match process(&inbox, &file, fail_pattern.as_deref()).await {
            Ok(bytes) => {
                info!(file = %file.name, bytes, "processed");
                summary.processed.push(file.name.clone());
            }
            Err(e) => {
                warn!(file = %file.name, error = %e, "processing failed");
                summary.failed.push(file.name.clone());
            }
        }

        // 失敗したファイルも確定させる（再び配られることはない）
        if let Completion::Anomalous(anomaly) = filter.on_outcome(&file).await? {
            summary
                .anomalies
                .push(format!("{}: {}", file.name, serde_json::to_string(&anomaly)?));
        }
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn process(
    inbox: &Path,
    file: &CandidateFile,
    fail_pattern: Option<&str>,
) -> anyhow::Result<usize> {
    if fail_pattern.is_some_and(|p| file.name.contains(p)) {
        anyhow::bail!("simulated failure");
    }
    let bytes = tokio::fs::read(inbox.join(&file.name))
        .await
        .with_context(|| format!("reading {}", file.name))?;
    Ok(bytes.len())
}

async fn cmd_inspect(store: PathBuf, config: Option<PathBuf>, name: String) -> anyhow::Result<()> {
    let filter = build_filter(store, config)?;
    let file = CandidateFile::new(name);
    match filter.status(&file).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("absent"),
    }
    Ok(())
}
