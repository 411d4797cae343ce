//! Gateway HTTP server.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listener.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, String),

    /// Server error while running.
    #[error("server error: {0}")]
    ServerFailed(String),
}

/// Bound gateway HTTP server.
pub struct GatewayServer {
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
}

impl GatewayServer {
    /// Bind the listener. Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::BindFailed` if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        app: Router,
        cancel: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e.to_string()))?;

        Ok(Self {
            listener,
            app,
            cancel,
        })
    }

    /// Address actually bound.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ServerFailed` if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::ServerFailed(e.to_string()))
    }

    /// Serve until cancelled and every open connection has finished.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ServerFailed` on a fatal server error.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        tracing::info!(addr = %addr, "Gateway HTTP server listening");

        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Gateway HTTP server stopped");
        Ok(())
    }
}
