//! Control surface: report on demand and current aggregates over HTTP.

mod handlers;

pub use handlers::*;

use crate::scheduler::Supervisor;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
}

/// Web server for Downtrail.
pub struct Server {
    state: AppState,
    port: u16,
}

impl Server {
    pub fn new(port: u16, supervisor: Arc<Supervisor>) -> Self {
        Self {
            state: AppState { supervisor },
            port,
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            .route("/api/targets", get(handlers::handle_get_targets))
            .route("/api/aggregates", get(handlers::handle_get_aggregates))
            .route("/api/report", post(handlers::handle_report))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Control surface listening on {}", addr);
        self.serve(listener).await
    }

    async fn serve(&self, listener: tokio::net::TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        axum::serve(listener, self.routes()).await?;
        Ok(())
    }
}
