// src/config.rs

//! Configuration loading utilities.
//!
//! Loads the pipeline configuration, fills secrets from the environment and
//! builds the chain in one step, so a bad setting stops the process before
//! the first item is read.

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::PipelineConfig;
use crate::pipeline::Chain;

/// Load a configuration file and apply environment secrets.
///
/// A missing or unreadable file is an error; there is no fallback to
/// defaults.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(path)
        .map_err(|e| AppError::config(format!("Failed to load {}: {e}", path.display())))?;
    config.apply_process_env();
    Ok(config)
}

/// Load, validate and build the chain.
pub fn load_pipeline(path: &Path) -> Result<(PipelineConfig, Chain)> {
    let config = load_config(path)?;
    let chain = Chain::from_config(&config)?;
    log::info!(
        "Loaded pipeline for spider '{}' from {}",
        config.context.spider,
        path.display()
    );
    Ok((config, chain))
}
