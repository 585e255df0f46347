use anyhow::{anyhow, Result};
use clap::Parser;
use sitesearch_core::{IndexBuilder, LemmaExtractor, Settings, Store};
use sitesearch_crawler::SiteCrawler;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Crawl one configured site into the index store")]
struct Cli {
    /// Path to the TOML configuration
    #[arg(long, default_value = "./sitesearch.toml")]
    config: PathBuf,
    /// Site to crawl, by URL or name; defaults to the first configured site
    #[arg(long)]
    site: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();
    let settings = Settings::load(&args.config)?;

    let site_config = match &args.site {
        Some(wanted) => settings
            .sites
            .iter()
            .find(|s| s.name == *wanted || s.base_url() == wanted.trim_end_matches('/')),
        None => settings.sites.first(),
    }
    .ok_or_else(|| anyhow!("no matching site in {}", args.config.display()))?;

    let store = Store::open(&settings.storage.path)?;
    let builder = IndexBuilder::new(store.clone(), Arc::new(LemmaExtractor::russian()));
    let site = store.recreate_site(site_config.base_url(), &site_config.name)?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping crawl");
            on_ctrl_c.cancel();
        }
    });

    let crawler = SiteCrawler::new(site, &settings.indexing, store.clone(), builder, cancel.clone())?;
    let report = crawler.crawl_site().await?;
    if report.cancelled {
        store.set_site_status(crawler.site().id, sitesearch_core::SiteStatus::Failed, Some("Indexing stopped by user".to_string()))?;
    }
    store.flush()?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
