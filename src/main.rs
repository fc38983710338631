use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use perch::auth::{IdentityProvider, StaticTokenProvider};
use perch::config::Settings;
use perch::engine::Engine;
use perch::http::{self, AppState};
use perch::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let settings = Arc::new(Settings::from_env()?);
    perch::observability::init(settings.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&settings.data_dir)?;

    let token_spec = std::env::var("PERCH_TOKENS").unwrap_or_default();
    let identity: Arc<dyn IdentityProvider> = Arc::new(StaticTokenProvider::from_spec(&token_spec)?);

    let wal_path = settings.data_dir.join("perch.wal");
    let engine = Arc::new(Engine::new(wal_path, settings.clone())?);

    tokio::spawn(sweeper::run_sweeper(engine.clone()));
    tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        settings.compact_threshold,
    ));

    let app = http::router(AppState {
        engine,
        identity,
    });

    let addr = format!("{}:{}", settings.bind, settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("perch listening on {addr}");
    info!("  data_dir: {}", settings.data_dir.display());
    info!("  timezone: {}", settings.timezone);
    info!(
        "  work hours: {:02}:{:02}-{:02}:{:02}, {}h slots",
        settings.work_start_hour,
        settings.work_start_minute,
        settings.work_end_hour,
        settings.work_end_minute,
        settings.booking_duration_hours
    );
    info!(
        "  metrics: {}",
        settings
            .metrics_port
            .map_or("disabled".to_string(), |p| format!(
                "http://0.0.0.0:{p}/metrics"
            ))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("perch stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
