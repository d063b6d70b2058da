use anyhow::Context;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use booking_engine::{
    app,
    config::{Config, LogFormat},
    AppState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Invalid configuration")?;

    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log));
    match config.app.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!(environment = %config.app.environment, "Starting Booking Engine API");

    let sweep_interval = config.booking.sweep_interval();
    let host = config.app.host.clone();
    let port = config.app.port;
    let app_state = AppState::new(config).await?;

    // --- Start background tasks ---

    // Таймеры удержания восстанавливаются из БД до приёма запросов
    let recovered = app_state
        .scheduler
        .recover()
        .await
        .context("Failed to recover hold timers")?;
    info!("Re-armed {} pending holds", recovered);
    let timer_loop = app_state.scheduler.spawn();
    let sweeper = app_state.scheduler.spawn_sweeper(sweep_interval);
    tokio::spawn(watch_background_task("expiry timer loop", timer_loop));
    tokio::spawn(watch_background_task("periodic sweep", sweeper));

    // --- Start the web server ---

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app(app_state).into_make_service())
        .await
        .context("Server error")?;
    Ok(())
}

// Фоновые задачи не должны завершаться, пока работает сервер
async fn watch_background_task(name: &'static str, handle: JoinHandle<()>) {
    match handle.await {
        Ok(()) => error!("❌ Background task {} exited", name),
        Err(e) => error!("❌ Background task {} crashed: {}", name, e),
    }
}
