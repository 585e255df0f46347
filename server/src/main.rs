use anyhow::Result;
use clap::Parser;
use sitesearch_core::{Settings, Store};
use sitesearch_server::{build_app, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Path to the TOML configuration
    #[arg(long, default_value = "./sitesearch.toml")]
    config: PathBuf,
    /// Host to bind, overriding the configuration
    #[arg(long)]
    host: Option<String>,
    /// Port to bind, overriding the configuration
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let settings = Settings::load(&args.config)?;

    let host = args.host.unwrap_or_else(|| settings.server.host.clone());
    let port = args.port.unwrap_or(settings.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    let store = Store::open(&settings.storage.path)?;
    let state = AppState::new(settings, store.clone());
    let indexing = state.indexing.clone();
    let app = build_app(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    indexing.stop_indexing().await;
    store.flush()?;
    Ok(())
}
