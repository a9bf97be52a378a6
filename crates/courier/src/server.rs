//! `CourierServer` builder and server loop.
//!
//! Ties the layers together: transport → protocol → session core, with one
//! handler task per connection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use courier_auth::{PasswordKdf, TokenSigner};
use courier_protocol::{Codec, JsonCodec};
use courier_store::Store;
use courier_transport::{Transport, WebSocketTransport};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::handler::handle_connection;
use crate::{CourierError, ServerConfig, SessionCore};

/// How long shutdown waits for open connections to say goodbye.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<S, T, K, C> {
    pub(crate) core: SessionCore<S, T, K>,
    pub(crate) codec: C,
    pub(crate) request_timeout: Duration,
    pub(crate) shutdown: CancellationToken,
}

/// Builder for configuring and starting a Courier server.
///
/// ```rust,ignore
/// let server = CourierServer::builder()
///     .config(ServerConfig::from_env()?)
///     .build(Arc::new(store), signer, kdf)
///     .await?;
/// server.run_until_shutdown(shutdown_signal()).await
/// ```
pub struct CourierServerBuilder {
    config: ServerConfig,
}

impl CourierServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.addr = addr.to_owned();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Binds the listener and assembles the session core.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<S, T, K>(
        self,
        store: Arc<S>,
        signer: T,
        kdf: K,
    ) -> Result<CourierServer<S, T, K, JsonCodec>, CourierError>
    where
        S: Store,
        T: TokenSigner,
        K: PasswordKdf,
    {
        let transport = WebSocketTransport::bind(&self.config.addr).await?;

        let core = SessionCore::new(store, signer, kdf)
            .with_token_ttl(self.config.token_ttl)
            .with_registry(self.config.registry.clone());

        let shutdown = CancellationToken::new();
        let state = Arc::new(ServerState {
            core,
            codec: JsonCodec,
            request_timeout: self.config.request_timeout,
            shutdown: shutdown.clone(),
        });

        Ok(CourierServer {
            transport,
            state,
            shutdown,
        })
    }
}

impl Default for CourierServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Courier server.
///
/// Call [`run`](Self::run) or [`run_until_shutdown`](Self::run_until_shutdown)
/// to start accepting connections.
pub struct CourierServer<S, T, K, C> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S, T, K, C>>,
    shutdown: CancellationToken,
}

impl CourierServer<(), (), (), ()> {
    pub fn builder() -> CourierServerBuilder {
        CourierServerBuilder::new()
    }
}

impl<S, T, K, C> CourierServer<S, T, K, C>
where
    S: Store,
    T: TokenSigner,
    K: PasswordKdf,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, CourierError> {
        Ok(self.transport.local_addr()?)
    }

    /// A token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn core(&self) -> &SessionCore<S, T, K> {
        &self.state.core
    }

    /// Runs until [`shutdown_token`](Self::shutdown_token) is cancelled.
    pub async fn run(self) -> Result<(), CourierError> {
        self.run_until_shutdown(std::future::pending()).await
    }

    /// Runs the accept loop until `signal` completes or the shutdown token
    /// is cancelled.
    ///
    /// On the way out every live stream is ended with a `StreamEnd` and
    /// open connections get a short grace period to finish.
    pub async fn run_until_shutdown(
        mut self,
        signal: impl Future<Output = ()>,
    ) -> Result<(), CourierError> {
        tracing::info!(addr = ?self.transport.local_addr().ok(), "Courier server running");

        let tracker = TaskTracker::new();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => {
                    tracing::info!("shutdown signal received");
                    break;
                }
                _ = self.shutdown.cancelled() => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tracker.spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        self.shutdown.cancel();
        self.state.core.shutdown();
        tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait()).await.is_err() {
            tracing::warn!(open = tracker.len(), "connections still open after drain timeout");
        }
        tracing::info!("Courier server stopped");
        Ok(())
    }
}
