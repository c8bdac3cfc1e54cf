mod config;
mod core;
mod interfaces;

use anyhow::Result;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use crate::config::TavernConfig;
use crate::core::guard::Guard;
use crate::core::store::Store;
use crate::interfaces::web::ApiServer;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = TavernConfig::load("tavern.toml").await?;
    let store = Store::open(&config.server.data_dir).await?;
    let guard = Guard::new(config.limits.clone());

    info!(
        "Starting Tavern API on {}:{}",
        config.server.host, config.server.port
    );
    ApiServer::new(store, guard, config.server.host.clone(), config.server.port)
        .serve()
        .await
}
