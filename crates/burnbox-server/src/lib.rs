pub mod config;
pub mod dirs;
pub mod error;
pub mod handlers;
pub mod server;
pub mod store;
pub mod vault;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub vault: vault::Vault,
}

pub use config::VaultConfig;
pub use error::VaultError;
pub use server::{build_router, read_key_file, resolve_master_key, run, ServerConfig};
pub use vault::{Created, Vault};
