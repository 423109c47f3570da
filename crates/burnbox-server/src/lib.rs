pub mod auth;
pub mod config;
pub mod handlers;
pub mod server;
pub mod store;

use std::sync::Arc;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::Store,
    /// Resolves bearer tokens to owners for the protected routes.
    pub identity: Arc<dyn auth::IdentityProvider>,
}

pub use config::{resolve_data_dir, ServerConfig};
pub use server::{build_cors, router, run};
