//! Read-only crawl context shared by every item in a run.

use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Per-run data that items use to derive storage keys and queue messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlContext {
    /// Name of the spider that produced the items
    pub spider: String,

    /// Date the run started; part of every storage key
    pub run_date: NaiveDate,
}

impl CrawlContext {
    /// Create a context for a run starting today (UTC).
    pub fn new(spider: impl Into<String>) -> Self {
        Self::with_date(spider, Utc::now().date_naive())
    }

    /// Create a context with a fixed run date.
    pub fn with_date(spider: impl Into<String>, run_date: NaiveDate) -> Self {
        Self {
            spider: spider.into(),
            run_date,
        }
    }

    /// Date partition used in storage keys, `YYYY/MM/DD`.
    pub fn date_path(&self) -> String {
        format!(
            "{:04}/{:02}/{:02}",
            self.run_date.year(),
            self.run_date.month(),
            self.run_date.day()
        )
    }
}
