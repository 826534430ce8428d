use std::time::Duration;

use chrono::Utc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mixillo_api::{
    api::{create_router, AppState},
    config::Config,
    db::{open_store, Cache, Db},
    services::moderation,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mixillo_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        environment = %config.environment,
        database_mode = ?config.database_mode,
        "Configuration loaded"
    );

    let db = Db::new(open_store(&config).await?);
    let (cache, cache_writer) = Cache::connect(config.redis_url.as_deref())?;

    let sweep_every = config.moderation_sweep_interval_secs;
    if sweep_every > 0 {
        tokio::spawn(run_sla_sweeps(db.clone(), Duration::from_secs(sweep_every)));
    }

    let address = format!("{}:{}", config.host, config.port);
    let state = AppState::new(db, cache, config);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("Server running on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(writer) = cache_writer {
        writer.shutdown().await;
    }
    tracing::info!("Server stopped");
    Ok(())
}

/// Escalates moderation items whose SLA deadline has passed
async fn run_sla_sweeps(db: Db, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match moderation::sweep_sla(&db, Utc::now()).await {
            Ok(result) if result.breached > 0 => {
                tracing::info!(breached = result.breached, escalated = result.escalated, "SLA sweep");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "SLA sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
