use std::sync::Arc;

use anyhow::Context;
use roomseats::{
    config::Config,
    occupancy::{Coordinator, Reaper},
    router,
    store::{SqliteStore, Store},
    users::{AccountSource, HttpAccounts, UserDirectory},
    AppState,
};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::connect(&config.database_url)
            .await
            .with_context(|| format!("cannot open store at {}", config.database_url))?,
    );

    let accounts = match &config.accounts_url {
        Some(url) => Some(Arc::new(HttpAccounts::new(url)?) as Arc<dyn AccountSource>),
        None => {
            info!("no ACCOUNTS_URL; users get random aliases");
            None
        }
    };
    let users = UserDirectory::new(store.clone(), accounts);
    let coordinator = Arc::new(Coordinator::new(store, users, config.occupancy.clone()));
    coordinator.restore().await.context("restoring rooms")?;

    let reaper = Reaper::new(coordinator.clone(), config.reaper).spawn();

    let app = router(AppState { coordinator }).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    reaper.abort();
    Ok(())
}
