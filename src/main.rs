//! Chatstats - cached message leaderboards and activity statistics for chat rooms.
//!
//! # Overview
//!
//! Chatstats answers "who posts the most" questions for a chat platform:
//! global and per-room leaderboards over today, this month, this year and
//! all time, plus the exact rank of any single user. Results are served
//! from a TTL cache that a background loop keeps warm.
//!
//! # Configuration
//!
//! See [`chatstats::config`] for the environment variables read at startup.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use chatstats::api::{self, AppState};
use chatstats::cache::{MemoryStore, StatsCache};
use chatstats::config::Config;
use chatstats::refresh::spawn_refresh_loop;
use chatstats::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("chatstats=info".parse()?))
        .init();

    let config = Config::from_env();

    info!(
        port = config.port,
        db_url = %config.database_url,
        cache_prefix = %config.cache_prefix,
        "Starting Chatstats server"
    );

    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let cache = StatsCache::new(storage.clone(), Arc::new(MemoryStore::new()))
        .with_prefix(&config.cache_prefix);

    match config.refresh_interval {
        Some(every) => {
            spawn_refresh_loop(cache.clone(), every);
            info!(every_secs = every.as_secs(), "Stats cache refresh enabled");
        }
        None => info!("Stats cache refresh disabled"),
    }

    let app = api::router(AppState { cache });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Chatstats is listening");

    axum::serve(listener, app).await?;

    storage.close().await;
    info!("Database closed");

    Ok(())
}
