// Relay API server

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use relay_core::logging::console_logs_disabled;
use relay_core::tools::ModuleHandlerRegistry;

use relay_api::config::ServerConfig;
use relay_api::server::{build_router, AppState};

fn init_tracing() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "relay_api=debug,relay_core=debug,tower_http=info".into());

    let console_layer = if console_logs_disabled() {
        None
    } else {
        Some(tracing_subscriber::fmt::layer())
    };

    let file_layer = if std::env::var("LLM_ADAPTER_DISABLE_FILE_LOGS").as_deref() == Ok("1") {
        None
    } else {
        std::fs::create_dir_all("logs").context("Failed to create logs directory")?;
        let path = format!("logs/adapter-{}.log", chrono::Utc::now().format("%Y%m%d"));
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {path}"))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Arc::new(file))
                .boxed(),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    tracing::info!("relay-api starting...");

    let config = ServerConfig::from_env();
    tracing::info!(
        addr = %config.addr,
        plugins = %config.plugins_dir,
        auth = !config.api_keys.is_empty(),
        "Configuration loaded"
    );

    if !relay_plugins::plugins_root_exists(std::path::Path::new(&config.plugins_dir)) {
        tracing::warn!(
            dir = %config.plugins_dir,
            "Plugins directory does not exist; every provider lookup will fail"
        );
    }

    // In-process tool handlers register here; deployments add their own
    let modules = ModuleHandlerRegistry::new();

    let addr = config.addr.clone();
    let state = AppState::new(config, modules);

    // Rate-limit buckets are evicted by last access so the map stays bounded
    let rate_limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            rate_limiter.evict_idle(Duration::from_secs(600));
        }
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}
