//! tiercache - cache engine admin server
//!
//! Serves the backend chosen by `CACHE_BACKEND` over the admin REST API.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiercache::api::create_router;
use tiercache::config::BackendKind;
use tiercache::{
    spawn_sweep_task, AppState, Config, LocalTableCache, RedisStore, RemoteCache, TieredCache,
};

/// Main entry point for the cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the configured backend (connecting to the remote store if needed)
/// 4. Start the local table sweep task when a local table is in use
/// 5. Start HTTP server on configured port
/// 6. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiercache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tiercache server");

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        "Configuration loaded: backend={:?}, port={}",
        config.backend, config.server_port
    );

    let (state, sweep_handle) = match config.backend {
        BackendKind::Remote => (AppState::remote(connect_remote(&config).await?), None),
        BackendKind::Local => {
            let (cache, handle) = start_local(&config);
            (AppState::local(cache), Some(handle))
        }
        BackendKind::Tiered => {
            let far = connect_remote(&config).await?;
            let (near, handle) = start_local(&config);
            let cache = TieredCache::new(near, far).with_fill_ttl(config.remote.fill_ttl);
            (AppState::tiered(cache), Some(handle))
        }
    };

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweep_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn connect_remote(config: &Config) -> anyhow::Result<RemoteCache<RedisStore>> {
    let store = RedisStore::connect(&config.remote.url)
        .await
        .with_context(|| format!("cannot reach remote store at {}", config.remote.url))?;
    info!("Remote store ready: namespace={}, pack={:?}", config.remote.namespace, config.remote.pack);
    Ok(RemoteCache::new(store)
        .with_namespace(config.remote.namespace.clone())
        .with_pack_mode(config.remote.pack))
}

/// Builds the local table and starts its sweep task.
fn start_local(config: &Config) -> (LocalTableCache, JoinHandle<()>) {
    let cache = LocalTableCache::new(config.local.clone());
    let handle = spawn_sweep_task(
        cache.clone(),
        config.expire_sweep_interval,
        config.cold_sweep_interval,
    );
    info!(
        "Local table ready: {} rows x {} bytes per shard",
        config.local.shard_rows, config.local.shard_content_width
    );
    (cache, handle)
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the sweep task.
async fn shutdown_signal(sweep_handle: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = sweep_handle {
        handle.abort();
        warn!("Sweep task aborted");
    }
}
