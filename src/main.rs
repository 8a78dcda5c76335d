use mimalloc::MiMalloc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use lectern::db::LecternStorage;
use lectern::router::{LecternState, lectern_router};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &lectern::config::CONFIG;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        listen_addr = %cfg.basic.listen_addr,
        database_url = %cfg.basic.database_url,
        public_url = %cfg.basic.public_url,
        content_api = %cfg.content_api.base_url,
        loglevel = %cfg.basic.loglevel,
        admin_key = cfg.basic.admin_key.is_some(),
    );

    let storage = LecternStorage::connect(&cfg.basic.database_url).await?;
    match storage.mark_interrupted_syncs().await {
        Ok(0) => {}
        Ok(n) => warn!(count = n, "marked interrupted syncs as failed"),
        Err(e) => warn!(error = %e, "failed to clean up interrupted syncs"),
    }

    let state = LecternState::from_config(storage, cfg)?;
    let app = lectern_router(state);

    let listener = TcpListener::bind(&cfg.basic.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
