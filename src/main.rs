// Entry point of the moderation pipeline.
//
// This file's job is to:
// 1. Load configuration
// 2. Pick the storage backend (once, for the whole process)
// 3. Wire the services together and start the auto-flag worker
// 4. Feed AI analysis records from stdin through the pipeline
//
// Input is one JSON `AiAnalysis` per line. On EOF the queue is drained and a
// stats rollup is printed to stdout as JSON.

use marketplace_trust::config::ModerationConfig;
use marketplace_trust::core::moderation::{AiAnalysis, AutoFlagDispatcher, ModerationStore};
use marketplace_trust::dashboard::TriageApi;
use marketplace_trust::infra::moderation::{InMemoryModerationStore, SqliteModerationStore};
use serde_json::json;
use std::sync::Arc;
use std::io::ErrorKind;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let config = ModerationConfig::from_env();

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // The backend is chosen here and nowhere else.

    if config.use_fixtures {
        tracing::info!("Using in-memory fixture store");
        let store = Arc::new(InMemoryModerationStore::with_fixtures());
        run(store, &config).await
    } else {
        tracing::info!("Using SQLite store at {}", config.database_url);
        let store = SqliteModerationStore::new(&config.database_url).await?;
        run(Arc::new(store), &config).await
    }
}

async fn run<S>(store: Arc<S>, config: &ModerationConfig) -> anyhow::Result<()>
where
    S: ModerationStore + 'static,
{
    let api = TriageApi::new(store, config.auto_flag_policy);
    let (dispatcher, worker) = api.spawn_auto_flag(config.auto_flag_queue_capacity);

    let counts = ingest(BufReader::new(tokio::io::stdin()), &dispatcher).await?;
    let IngestCounts { accepted, skipped } = counts;

    drop(dispatcher);
    let summary = worker.join().await?;

    tracing::info!(
        accepted,
        skipped,
        flagged = summary.flagged,
        failed = summary.failed,
        "Ingest finished"
    );

    let stats = api.get_moderation_stats().await?;
    let report = json!({
        "ingest": { "accepted": accepted, "skipped": skipped },
        "autoFlag": summary,
        "stats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

#[derive(Debug, Default, PartialEq)]
struct IngestCounts {
    accepted: u64,
    skipped: u64,
}

/// Feed every JSON line from `reader` to the dispatcher. Bad lines (not
/// UTF-8, not JSON) are skipped; only real I/O errors stop the ingest.
async fn ingest<R>(reader: R, dispatcher: &AutoFlagDispatcher) -> anyhow::Result<IngestCounts>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut counts = IngestCounts::default();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                counts.skipped += 1;
                tracing::warn!("Skipping analysis line that is not UTF-8: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<AiAnalysis>(line) {
            Ok(analysis) => {
                // Batch ingest waits for queue space instead of dropping work.
                dispatcher.enqueue(analysis).await?;
                counts.accepted += 1;
            }
            Err(e) => {
                counts.skipped += 1;
                tracing::warn!("Skipping malformed analysis line: {}", e);
            }
        }
    }

    Ok(counts)
}
