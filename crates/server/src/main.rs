mod api;
mod bootstrap;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::{header, HeaderValue, Method};
use procura_core::config::{AppConfig, LoadOptions};
use procura_db::SqlEmailConfigRepository;
use tower_http::cors::{AllowOrigin, CorsLayer};

fn init_logging(config: &AppConfig) {
    use procura_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let router = api::router(api::ApiState {
        runtime: app.runtime.clone(),
        store: app.store.clone(),
        suppliers: app.catalog.clone(),
        products: app.catalog.clone(),
        ingestor: app.ingestor.clone(),
        email_configs: Arc::new(SqlEmailConfigRepository::new(app.db_pool.clone())),
        mail_servers: api::MailServers::from_settings(&app.config.email),
    })
    .merge(health::router(app.db_pool.clone()))
    .layer(cors(&app.config.server.frontend_origins));

    let mailbox = match app.mailbox {
        Some(runner) => {
            tracing::info!(
                event_name = "system.server.mailbox_mode",
                transport_mode = "noop",
                correlation_id = "bootstrap",
                "mailbox runner started; supplier replies arrive through the synthetic channel"
            );
            Some(tokio::spawn(async move { runner.start().await }))
        }
        None => None,
    };

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "procura-server started"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "procura-server stopping"
    );
    if let Some(mailbox) = mailbox {
        mailbox.abort();
    }
    app.runtime.shutdown(Duration::from_secs(app.config.server.graceful_shutdown_secs)).await;
    app.db_pool.close().await;

    Ok(())
}

fn cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> =
        origins.iter().filter_map(|origin| HeaderValue::from_str(origin.trim()).ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for shutdown signal");
    }
}
