//! Background host for the feed store. Reads one JSON request per line on
//! stdin and answers with one JSON response per line on stdout. Requests run
//! concurrently; a request's `id` is echoed on its response.
//!
//! `feed-service --refresh` runs a single refresh and exits.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use feed_core::{
    serve_lines, Extractor, FeedConfig, FeedService, HttpSurfaces, JsonFileStore, Response,
};
use reqwest::{redirect, ClientBuilder};
use tokio::io::BufReader;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let dir = config_dir();
    let config = FeedConfig::load_or_init(dir.join("config.json"));
    let service = Arc::new(build_service(&dir, &config)?);

    if std::env::args().skip(1).any(|arg| arg == "--refresh") {
        let summary = service.refresh().await?;
        println!("{}", serde_json::to_string(&Response::ingested(summary))?);
        return Ok(());
    }

    let mut changes = service.subscribe();
    tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            debug!(
                total = change.total_posts,
                last_updated = ?change.last_updated,
                "feed state changed"
            );
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    serve_lines(service, stdin, tokio::io::stdout()).await?;
    info!("stdin closed, shutting down");
    Ok(())
}

fn init_tracing() {
    // stdout carries responses; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn config_dir() -> PathBuf {
    match std::env::var_os("SUBSTACK_FEED_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => FeedConfig::default_dir(),
    }
}

fn build_service(dir: &std::path::Path, config: &FeedConfig) -> Result<FeedService, Box<dyn Error>> {
    let client = ClientBuilder::new()
        .redirect(redirect::Policy::limited(5))
        .user_agent(config.user_agent.as_str())
        .timeout(config.request_timeout())
        .build()?;
    let store = Arc::new(JsonFileStore::new(
        dir.join("feed_state.json"),
        config.quota_bytes,
    ));
    let surfaces = Arc::new(HttpSurfaces::new(client, Extractor::default()));
    info!(dir = %dir.display(), feed_url = %config.feed_url, "feed service ready");
    Ok(FeedService::new(store, surfaces, config))
}
