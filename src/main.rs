//! DOTS server
//!
//! This is the main entry point for the DOTS server.
//! It initializes the application components and starts the web server.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::info;

use dots_server::api::{self, ApiState};
use dots_server::config;
use dots_server::core::{monitoring, storage};
use dots_server::core::{LocalTransport, Notifier, ResourceRegistry};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting DOTS server...");

    // Load configuration
    let config = config::load_config().context("Failed to load configuration")?;

    let metrics = monitoring::install_recorder(&config.monitoring).context("Failed to install metrics recorder")?;
    let store = storage::connect(&config.storage).context("Failed to open store")?;

    // Resource registry on the in-process transport
    let transport = Arc::new(LocalTransport::new());
    let registry = Arc::new(ResourceRegistry::new(transport));
    let notifier = Notifier::new(registry.clone());
    notifier
        .install_unknown()
        .await
        .context("Failed to install catch-all resource")?;

    // Create API state
    let state = web::Data::new(
        ApiState::new(&config, store, notifier, metrics).context("Invalid signal configuration settings")?,
    );

    info!("Listening on {}:{}", config.server.host, config.server.port);

    // Start HTTP server
    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::config))
        .bind((config.server.host.as_str(), config.server.port))?
        .run()
        .await?;

    registry.unbind_all().await;
    info!("DOTS server stopped");
    Ok(())
}
