use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use sitesearch_core::{stats, LemmaExtractor, Settings, Store};
use sitesearch_indexer::IndexingService;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Run and manage site indexing", long_about = None)]
struct Cli {
    /// Path to the TOML configuration
    #[arg(long, default_value = "./sitesearch.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every configured site and wait for the run to finish; Ctrl-C stops it
    Run,
    /// Re-index a single page of a configured site
    Page {
        /// Absolute URL of the page
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;
    let store = Store::open(&settings.storage.path)?;
    let service = IndexingService::new(settings, store.clone(), Arc::new(LemmaExtractor::russian()));

    match cli.command {
        Commands::Run => {
            if !service.start_indexing() {
                bail!("indexing already running");
            }
            tokio::select! {
                _ = service.wait_until_idle() => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted, stopping indexing");
                    service.stop_indexing().await;
                }
            }
        }
        Commands::Page { url } => service.index_page(&url).await?,
    }

    store.flush()?;
    let statistics = stats::collect(&store, service.is_running())?;
    println!("{}", serde_json::to_string_pretty(&statistics)?);
    Ok(())
}
