use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::info;

use crate::config::Config;
use crate::external::{ForeignTreeValidator, MetadataClient, SignatureVerifier};
use crate::layout::Layout;
use crate::nonce::NonceCache;
use crate::owner_cache::OwnerCache;
use crate::rate_limit::RateLimiter;
use crate::session::SessionRegistry;

/// Shared application state, injected into every handler via `Extension`.
pub struct AppState {
    pub config: Config,
    pub layout: Arc<Layout>,
    pub sessions: Arc<SessionRegistry>,
    pub nonces: Arc<NonceCache>,
    pub owners: Arc<OwnerCache>,
    pub upload_rate_limiter: Arc<RateLimiter>,
    pub fetch_rate_limiter: Arc<RateLimiter>,
    pub signature_verifier: Arc<dyn SignatureVerifier>,
    pub metadata: Arc<dyn MetadataClient>,
    pub tree_validator: Arc<dyn ForeignTreeValidator>,
}

/// Build the application state, run startup housekeeping (base directories,
/// stale temp directory purge), and spawn the background sweepers.
pub async fn build_state(
    config: Config,
    signature_verifier: Arc<dyn SignatureVerifier>,
    metadata: Arc<dyn MetadataClient>,
    tree_validator: Arc<dyn ForeignTreeValidator>,
) -> eyre::Result<Arc<AppState>> {
    let layout = Arc::new(Layout::new(config.storage_root.clone()));
    layout.ensure_base_dirs().await?;

    let sessions = SessionRegistry::new(
        Duration::from_secs(config.session_ttl_secs),
        Arc::clone(&layout),
    );
    sessions.purge_stale_temp_dirs().await?;

    let nonces = Arc::new(NonceCache::new(Duration::from_secs(config.nonce_ttl_secs)));
    let owners = Arc::new(OwnerCache::new(
        Duration::from_secs(config.owner_cache_ttl_secs),
        Arc::clone(&metadata),
    ));
    let upload_rate_limiter = Arc::new(RateLimiter::new(config.upload_start_rate_limit));
    let fetch_rate_limiter = Arc::new(RateLimiter::new(config.fetch_rate_limit));

    let state = Arc::new(AppState {
        config: config.clone(),
        layout,
        sessions: Arc::clone(&sessions),
        nonces: Arc::clone(&nonces),
        owners: Arc::clone(&owners),
        upload_rate_limiter: Arc::clone(&upload_rate_limiter),
        fetch_rate_limiter: Arc::clone(&fetch_rate_limiter),
        signature_verifier,
        metadata,
        tree_validator,
    });

    spawn_sweepers(
        sessions,
        nonces,
        owners,
        upload_rate_limiter,
        fetch_rate_limiter,
        Duration::from_secs(config.session_sweep_interval_secs),
        Duration::from_secs(config.cache_sweep_interval_secs),
    );

    Ok(state)
}

fn spawn_sweepers(
    sessions: Arc<SessionRegistry>,
    nonces: Arc<NonceCache>,
    owners: Arc<OwnerCache>,
    upload_rate_limiter: Arc<RateLimiter>,
    fetch_rate_limiter: Arc<RateLimiter>,
    session_interval: Duration,
    cache_interval: Duration,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(session_interval);
        loop {
            tick.tick().await;
            sessions.sweep_expired().await;
        }
    });

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(cache_interval);
        loop {
            tick.tick().await;
            nonces.sweep_expired();
            owners.sweep_expired();
            upload_rate_limiter.sweep_expired();
            fetch_rate_limiter.sweep_expired();
        }
    });
}

/// Start the HTTPS-fronted propagation server and run until a shutdown
/// signal is received, leaving any in-flight sessions on disk for the next
/// startup's stale-temp-dir purge.
pub async fn start_server(state: Arc<AppState>) -> eyre::Result<()> {
    let addr = state.config.listen_addr;
    let app = crate::api::routes::create_router(Arc::clone(&state));

    info!("propagation server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// Await `ctrl_c` racing a Unix `SIGTERM` handler.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, shutting down");
}
