use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use hn_cache_proxy::config::Settings;
use hn_cache_proxy::fetcher::Fetcher;
use hn_cache_proxy::hn_client::HackerNewsClient;
use hn_cache_proxy::{logging, server, warmer};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init();

    let settings = Settings::from_env()?;
    let client = HackerNewsClient::new(&settings.api_base_url)
        .context("failed to create HTTP client")?;
    info!(upstream = client.base_url(), "using Hacker News API");
    let fetcher = Fetcher::with_fresh_cache(Arc::new(client), settings.fetch.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(port = settings.port, "starting server");

    let warming = warmer::spawn(fetcher.clone());
    let app = server::router(fetcher, "public");

    let served = server::serve(listener, app, server::shutdown_signal()).await;
    warming.abort();
    served.context("server error")?;

    info!("process terminated");
    Ok(())
}
