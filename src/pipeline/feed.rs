//! JSON-lines item feed.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{AppError, Result};
use crate::models::{CrawlContext, ItemRecord};
use crate::pipeline::{Chain, RunSummary};

/// Read one [`ItemRecord`] per line and run each through `chain`.
///
/// Blank lines and lines starting with `#` are skipped. A malformed line
/// stops the feed with [`AppError::Item`]; items before it have already
/// been processed.
pub async fn run_feed<R>(chain: &Chain, ctx: &CrawlContext, reader: R) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = RunSummary::default();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let record: ItemRecord =
            serde_json::from_str(trimmed).map_err(|e| AppError::item(line_no, e))?;
        let item = record.into_item().map_err(|e| AppError::item(line_no, e))?;

        let outcome = chain.run(item, ctx).await;
        summary.record(outcome);
    }

    log::info!(
        "Feed finished: {} persisted, {} dropped, {} failed",
        summary.persisted,
        summary.dropped,
        summary.failed()
    );
    Ok(summary)
}
