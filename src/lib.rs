// src/lib.rs

//! crawl-sink: persistence pipeline for crawled items.
//!
//! Items flow through an ordered [`pipeline::Chain`] of sinks (local files,
//! S3-compatible object storage, a message queue, a dedupe filter). Each sink
//! only handles items that expose the capability it needs and forwards the
//! rest untouched.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod utils;
