//! Item sinks and the chain that runs them.
//!
//! - `Sink`: one persistence or filtering stage against one backend
//! - `Chain`: ordered sinks, stopping at the first drop or failure
//! - `run_feed`: pushes a JSON-lines item stream through a chain

pub mod chain;
pub mod dedupe;
pub mod feed;
pub mod local;
pub mod object;
pub mod queue;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::{CrawlContext, ItemRef};

pub use chain::{Chain, ChainBuilder, ChainOutcome, RunSummary};
pub use dedupe::DedupeFilterSink;
pub use feed::run_feed;
pub use local::LocalFileSink;
pub use object::ObjectStorageSink;
pub use queue::MessageQueueSink;

/// What a sink decided for an item.
#[derive(Debug, Clone)]
pub enum SinkOutcome {
    /// Continue with this item (always the one that came in)
    Forward(ItemRef),
    /// Discard the item for the rest of the chain
    Drop,
}

/// One stage of the pipeline.
///
/// A sink that does not apply to an item (missing capability, other kind)
/// must return `Forward` with the item unchanged. `Err` is reserved for real
/// failures; it is never used to signal "not applicable" or "duplicate".
#[async_trait]
pub trait Sink: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Process a single item.
    async fn process(&self, item: ItemRef, ctx: &CrawlContext) -> Result<SinkOutcome, SinkError>;
}
