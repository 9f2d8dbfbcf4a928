use std::sync::Arc;

use qrgen::config::Config;
use qrgen::logs::{LogStore, TeeMakeWriter};
use qrgen::models::AppState;
use qrgen::router::build_router;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() {
    // The log store is sized from the config, so the config loads before
    // tracing and its warnings are emitted once the subscriber is up.
    let (config, config_warnings) = Config::from_env_deferred();
    let logs = Arc::new(LogStore::new(config.log_lines));
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(TeeMakeWriter::new(logs.clone()))
        .init();

    for w in config_warnings {
        warn!("{}", w);
    }
    for dir in [&config.upload_dir, &config.files_dir] {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            error!("Failed to create directory {:?}: {}", dir, e);
            std::process::exit(1);
        }
    }
    if config.admin_token.is_none() {
        info!("QRGEN_ADMIN_TOKEN not set, /api/logs is disabled");
    }

    let addr = config.bind_addr();
    let public_base_url = config.public_base_url.clone();
    let app = build_router(Arc::new(AppState::new(config, logs)));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("qrgen listening on {} (public base {})", addr, public_base_url);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
