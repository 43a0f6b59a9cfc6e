//! Gateway server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::routes::create_router;
use crate::state::GatewayState;

/// HTTP server exposing the configured services through emulated sessions.
#[derive(Debug, Clone)]
pub struct GatewayServer {
    state: Arc<GatewayState>,
}

impl GatewayServer {
    /// Create a server for `config`.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            state: Arc::new(GatewayState::new(config)),
        }
    }

    /// Shared handler state.
    #[must_use]
    pub fn state(&self) -> Arc<GatewayState> {
        Arc::clone(&self.state)
    }

    /// The router without a listener.
    pub fn router(&self) -> axum::Router {
        create_router(self.state())
    }

    /// Serve on the configured address until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails or the server stops abnormally.
    pub async fn serve_with_shutdown<F>(&self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config().bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::BindFailed(addr, e))?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the server stops abnormally.
    pub async fn serve_listener<F>(&self, listener: TcpListener, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listener
            .local_addr()
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let sweep = self.state.config().session.inactivity_sweep_period();
        let sweeper = self.state.config().session.inactivity_timeout().is_some()
            .then(|| self.state.tracker().spawn_sweeper(sweep));

        info!(
            addr = %addr,
            services = self.state.config().services.len(),
            "Gateway listening"
        );

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()));

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        info!("Gateway shut down");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = GatewayServer::new(GatewayConfig::default());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let task = tokio::spawn({
            let server = server.clone();
            async move {
                server
                    .serve_listener(listener, async {
                        let _ = rx.await;
                    })
                    .await
            }
        });

        let stream = tokio::net::TcpStream::connect(addr).await;
        assert!(stream.is_ok());
        drop(stream);

        tx.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = GatewayServer::new(GatewayConfig::default().with_bind_addr(addr));

        let err = server.serve_with_shutdown(async {}).await.unwrap_err();
        assert!(matches!(err, GatewayError::BindFailed(a, _) if a == addr));
    }
}
