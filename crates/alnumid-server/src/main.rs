#![doc = include_str!("../README.md")]

mod server;

use alnumid::{
    AllocationContext, Catalog, Clock, CsvBatchStore, Engine, HmacTokenEncoder, Reconciler,
    SystemClock,
};
use anyhow::Context;
use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::http::{AppState, router};
use server::runs::RunRegistry;
use server::shortlink::ShortLinkClient;
use server::telemetry::{TelemetryProviders, init_telemetry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let context = AllocationContext::new(
        &config.layout,
        config.default_width,
        config.quota,
        clock.clone(),
    )
    .context("failed to open allocation state")?;
    let catalog = Catalog::load(&config.catalog_path).with_context(|| {
        format!("failed to load catalog {}", config.catalog_path.display())
    })?;
    let encoder = HmacTokenEncoder::load_or_create(&config.layout.token_key_path)
        .context("failed to load token key")?;
    let resolver = ShortLinkClient::new(config.shortlink.clone())?;
    let sink = CsvBatchStore::new(&config.layout.tracking_dir, &config.layout.result_dir);

    let engine = Engine::new(
        Arc::new(context),
        Arc::new(catalog),
        encoder,
        Reconciler::new(resolver, config.reconcile),
        sink,
        clock,
    );
    let runs = Arc::new(RunRegistry::default());
    let app = router(AppState {
        engine: Arc::new(engine),
        runs: runs.clone(),
    });

    let listener = TcpListener::bind(config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;
    log_startup_info(&config);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(runs, providers))
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting alnumid service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            addr = %config.server_addr,
            max_ids = config.quota.max_ids,
            data_dir = %config.layout.tracking_dir.display(),
            "Starting alnumid service"
        );
    }
}

async fn shutdown_signal(runs: Arc<RunRegistry>, providers: TelemetryProviders) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // Runs still in flight are abandoned; their ranges are re-issued by the
    // next process since nothing was persisted for them.
    let running = runs.running();
    if running > 0 {
        tracing::warn!(running, "abandoning unfinished runs");
    }

    providers.shutdown();
}
