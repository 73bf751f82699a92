use super::handlers::*;
use crate::coordinator::ArenaRequestHandler;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub struct RpcServer {
    addr: SocketAddr,
}

impl RpcServer {
    pub fn new(port: u16) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        Self { addr }
    }

    pub fn router(handler: Arc<ArenaRequestHandler>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/wabisabi/status", get(get_status))
            .route("/wabisabi/input-registration", post(register_input))
            .route("/wabisabi/connection-confirmation", post(confirm_connection))
            .route("/wabisabi/output-registration", post(register_output))
            .route("/wabisabi/credential-issuance", post(reissue_credentials))
            .route("/wabisabi/input-unregistration", post(remove_input))
            .route("/wabisabi/transaction-signature", post(sign_transaction))
            .layer(TraceLayer::new_for_http())
            .with_state(handler)
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, handler: Arc<ArenaRequestHandler>, shutdown: CancellationToken) -> Result<()> {
        let app = Self::router(handler);

        tracing::info!("RPC server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}
