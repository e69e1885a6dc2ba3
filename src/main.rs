//! # Sluice CLI (`sluice`)
//!
//! ## Usage
//!
//! ```bash
//! sluice --config ./config/sluice.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sluice run` | Run connectors through the pipeline into the indexer |
//! | `sluice validate` | Check the config and assemble the pipeline |
//! | `sluice stages` | List available stage types |
//! | `sluice sources` | List configured connectors |

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{filter::LevelFilter, fmt};

use sluice::{config, connector, indexer, runner, stages};

/// Sluice: connectors, a stage pipeline, and an indexing sink.
#[derive(Parser)]
#[command(name = "sluice", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sluice.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run connectors through the pipeline and deliver the results.
    Run {
        /// `all`, a connector type (`filesystem`), or one instance (`filesystem:docs`).
        #[arg(long = "connector")]
        filter: Option<String>,
    },
    /// Load the config, then start and stop the pipeline without reading any source.
    Validate,
    /// List registered stage types.
    Stages,
    /// List configured connectors.
    Sources,
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(log_level(cli.verbose));

    let registry = Arc::new(stages::stage_registry());

    // Commands that don't require config
    if let Commands::Stages = cli.command {
        stages::list_stages(&registry);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run { filter } => {
            let connectors = connector::ConnectorRegistry::from_config(&cfg);
            let sink = indexer::from_config(&cfg.indexer)?;
            let summary = runner::run_pipeline(
                &cfg,
                registry,
                &connectors,
                sink,
                filter.as_deref(),
            )
            .await?;
            summary.print();
        }
        Commands::Validate => {
            let pipeline = runner::start_pipeline(&cfg, registry).await?;
            println!("pipeline {}", pipeline.name());
            for (index, name) in pipeline.stage_names().iter().enumerate() {
                println!("  {}. {}", index + 1, name);
            }
            runner::stop_pipeline(pipeline).await?;
            println!("ok");
        }
        Commands::Sources => {
            connector::list_sources(&connector::ConnectorRegistry::from_config(&cfg));
        }
        Commands::Stages => {}
    }

    Ok(())
}
