//! Web server module.
//!
//! Serves the live dashboard and the read-only JSON API. This layer only
//! observes state; it never triggers probes or transitions.

mod handlers;

pub use handlers::*;

use crate::config::Config;
use crate::db::Store;
use crate::monitor::StatusRegistry;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub registry: Arc<StatusRegistry>,
}

/// Dashboard web server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: Config, store: Store, registry: Arc<StatusRegistry>) -> Self {
        Self {
            state: AppState {
                config,
                store,
                registry,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Pages
            .route("/", get(handlers::handle_dashboard))
            .route("/history", get(handlers::handle_history_page))
            // API endpoints
            .route("/api/status", get(handlers::handle_status_api))
            .route("/api/history", get(handlers::handle_history_api))
            // Static assets
            .route("/favicon.ico", get(handlers::handle_favicon))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port; returns once ctrl-c arrives.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Dashboard listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received ctrl-c, shutting down");
            })
            .await?;

        Ok(())
    }
}
