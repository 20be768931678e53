use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    config::VaultConfig,
    handlers::{consume_secret, create_secret, health, legacy_generate, legacy_reveal},
    store::{crypto::EncryptionKey, SecretStore, Store},
    vault::Vault,
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub master_key: EncryptionKey,
    pub data_dir: Option<PathBuf>,
    pub vault: VaultConfig,
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
    pub max_body_bytes: usize,
}

/// Read a base64 master key from a file, trimming surrounding whitespace.
pub fn read_key_file(path: &Path) -> Result<EncryptionKey> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read key file: {}", path.display()))?;
    crate::store::crypto::parse_key(&content)
        .with_context(|| format!("invalid master key in {}", path.display()))
}

/// Resolve the master key from `BURNBOX_MASTER_KEY_FILE` (preferred) or `BURNBOX_MASTER_KEY`.
/// There is no fallback: without a key the server refuses to start.
pub fn resolve_master_key() -> Result<EncryptionKey> {
    if let Ok(path) = std::env::var("BURNBOX_MASTER_KEY_FILE") {
        let key = read_key_file(Path::new(&path))?;
        if std::env::var("BURNBOX_MASTER_KEY").is_ok() {
            warn!("both BURNBOX_MASTER_KEY and BURNBOX_MASTER_KEY_FILE are set; using file");
        }
        return Ok(key);
    }
    let encoded = std::env::var("BURNBOX_MASTER_KEY").context(
        "BURNBOX_MASTER_KEY or BURNBOX_MASTER_KEY_FILE is required (generate one with `burnbox keygen`)",
    )?;
    crate::store::crypto::parse_key(&encoded).context("invalid BURNBOX_MASTER_KEY")
}

/// Assemble the HTTP routes around `state`.
pub fn build_router(state: AppState, cors_origins: Option<&str>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/secrets", post(create_secret))
        .route("/secrets/{token}", post(consume_secret))
        .route("/generate", post(legacy_generate))
        .route("/generate/{token}", post(legacy_reveal))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    cfg.vault.validate().context("invalid vault configuration")?;
    if cfg.sweep_interval.is_zero() {
        anyhow::bail!("sweep interval must be greater than zero");
    }

    let data_dir = crate::dirs::data_dir(cfg.data_dir.as_deref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let db_path = data_dir.join(crate::dirs::DB_FILE);
    let store = Store::open(&db_path).context("open store")?;

    let sweep = store.clone().spawn_sweep(cfg.sweep_interval);

    info!(
        algorithm = %cfg.vault.hash.algorithm,
        iterations = cfg.vault.hash.iterations,
        ttl = ?cfg.vault.ttl,
        "vault configured"
    );
    let state = AppState {
        vault: Vault::new(store, cfg.master_key, cfg.vault),
    };

    let app = build_router(state, cfg.cors_origins.as_deref(), cfg.max_body_bytes);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "burnbox server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    sweep.abort();
    info!("burnbox server stopped");
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
