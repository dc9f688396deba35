//! crawl-sink CLI
//!
//! Validates a pipeline configuration and pushes JSON-lines item feeds
//! through the configured sink chain.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use crawl_sink::{
    config,
    error::{AppError, Result},
    models::{CrawlContext, PipelineConfig, QueueBackend, SinkKind, validate_spider},
    pipeline::{self, Chain},
};
use tokio::io::BufReader;

/// crawl-sink - persist crawled items through a sink chain
#[derive(Parser, Debug)]
#[command(
    name = "crawl-sink",
    version,
    about = "Persist crawled items to files, object storage and message queues"
)]
struct Cli {
    /// Path to the pipeline configuration file
    #[arg(short, long, default_value = "crawl-sink.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and build the chain
    Validate,

    /// Push a JSON-lines item feed through the chain
    Push {
        /// Feed file; reads stdin when omitted or `-`
        input: Option<PathBuf>,

        /// Override the spider name from the configuration
        #[arg(long)]
        spider: Option<String>,
    },

    /// Show the resolved configuration
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Validate => {
            log::info!("Validating {}...", cli.config.display());
            let (_, chain) = config::load_pipeline(&cli.config).inspect_err(|e| {
                log::error!("Config validation failed: {}", e);
            })?;
            log::info!("✓ Config OK ({} sink(s))", chain.len());
        }

        Command::Push { input, spider } => {
            let (config, chain) = config::load_pipeline(&cli.config)?;
            let ctx = match spider {
                Some(name) => {
                    validate_spider(&name).map_err(|e| AppError::config(format!("--spider: {e}")))?;
                    CrawlContext::new(name)
                }
                None => config.crawl_context(),
            };
            log::info!("Pushing items for {} ({})", ctx.spider, ctx.date_path());

            let summary = match input.filter(|p| p.as_os_str() != "-") {
                Some(path) => {
                    let file = tokio::fs::File::open(&path).await.map_err(|e| {
                        AppError::config(format!("Cannot open feed {}: {e}", path.display()))
                    })?;
                    pipeline::run_feed(&chain, &ctx, BufReader::new(file)).await?
                }
                None => pipeline::run_feed(&chain, &ctx, BufReader::new(tokio::io::stdin())).await?,
            };

            println!(
                "persisted={} dropped={} failed={}",
                summary.persisted,
                summary.dropped,
                summary.failed()
            );

            if let Some(first) = summary.failures.into_iter().next() {
                return Err(AppError::Chain(first));
            }
        }

        Command::Info => {
            let config = config::load_config(&cli.config)?;
            print_info(&config);
            match Chain::from_config(&config) {
                Ok(chain) => log::info!("Chain: [{}]", chain.sink_names().join(", ")),
                Err(e) => log::warn!("Chain cannot be built: {}", e),
            }
        }
    }

    Ok(())
}

fn print_info(config: &PipelineConfig) {
    log::info!("Spider: {}", config.context.spider);
    for kind in &config.pipeline.order {
        let state = if config.is_enabled(*kind) { "enabled" } else { "disabled" };
        let target = match kind {
            SinkKind::Local => config.local.root_dir.display().to_string(),
            SinkKind::ObjectStorage => format!(
                "{}/{}",
                config.object_storage.endpoint_url(),
                config.object_storage.bucket
            ),
            SinkKind::Queue => match config.queue.backend {
                QueueBackend::Kafka => format!(
                    "kafka topic {} via {}",
                    config.queue.topic,
                    config.queue.servers.join(",")
                ),
                QueueBackend::Mns => format!(
                    "mns queue {} at {}",
                    config.queue.topic, config.queue.mns.endpoint
                ),
            },
            SinkKind::Dedupe => format!("index {}", config.dedupe.index),
        };
        log::info!("  {:<15} {:<9} {}", kind.as_str(), state, target);
    }
}
