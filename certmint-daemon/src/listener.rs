//! TCP accept loop.
//!
//! Every accepted socket gets its own task; the loop goes straight back to
//! `accept`. Only a non-transient accept error or shutdown ends the loop.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::cache::IdentityCache;
use crate::handler::{ConnectionHandler, HandlerConfig};
use crate::shutdown::ShutdownSignal;

/// Listener tuning.
#[derive(Debug, Clone, Default)]
pub struct ListenerConfig {
    /// Cap on concurrently served connections. When reached, the loop stops
    /// accepting until a connection finishes. `None` is unbounded.
    pub max_connections: Option<usize>,
    pub handler: HandlerConfig,
}

/// Connection counts at the time the loop stopped.
///
/// Connections still in flight are counted as accepted only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub accepted: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct ConnectionStats {
    accepted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl ConnectionStats {
    fn snapshot(&self) -> ServeSummary {
        ServeSummary {
            accepted: self.accepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Accepts connections and hands each to a [`ConnectionHandler`].
pub struct Listener {
    listener: TcpListener,
    cache: IdentityCache,
    config: ListenerConfig,
    stats: Arc<ConnectionStats>,
}

impl Listener {
    pub fn new(listener: TcpListener, cache: IdentityCache, config: ListenerConfig) -> Self {
        Self {
            listener,
            cache,
            config,
            stats: Arc::new(ConnectionStats::default()),
        }
    }

    /// Bind `addr` and wrap the socket.
    pub async fn bind(
        addr: SocketAddr,
        cache: IdentityCache,
        config: ListenerConfig,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, cache, config))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until shutdown or a fatal accept error.
    pub async fn serve(self, mut shutdown: ShutdownSignal) -> io::Result<ServeSummary> {
        let admission = self
            .config
            .max_connections
            .map(|limit| Arc::new(Semaphore::new(limit)));

        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(
                addr = %addr,
                max_connections = ?self.config.max_connections,
                "Listening for identity requests"
            );
        }

        loop {
            let permit = match &admission {
                Some(admission) => tokio::select! {
                    permit = Arc::clone(admission).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                    _ = shutdown.recv() => {
                        tracing::info!("Shutdown signal received, stopping accept loop");
                        break;
                    }
                },
                None => None,
            };

            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => {
                        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(peer = %peer, "Accepted connection");

                        let handler = ConnectionHandler::new(
                            stream,
                            peer,
                            self.cache.clone(),
                            self.config.handler.clone(),
                        );
                        let stats = Arc::clone(&self.stats);
                        tokio::spawn(async move {
                            let _permit = permit;
                            match handler.run().await {
                                Ok(()) => stats.completed.fetch_add(1, Ordering::Relaxed),
                                Err(_) => stats.failed.fetch_add(1, Ordering::Relaxed),
                            };
                        });
                    }
                    Err(e) if is_transient(&e) => {
                        tracing::warn!(error = %e, "TCP accept failed");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Fatal accept error, stopping listener");
                        return Err(e);
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        Ok(self.stats.snapshot())
    }
}

/// Errors tied to a single pending connection rather than the socket.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}
