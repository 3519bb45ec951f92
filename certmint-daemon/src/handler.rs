//! Per-connection request handling.
//!
//! One request per connection:
//! `ReadingIdentity -> AwaitingResult -> WritingResponse -> Closed`,
//! or `Failed` from any step. A failed connection is closed without
//! writing anything; the protocol has no error message.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use certmint_issuer::GenerationError;
use certmint_proto::{read_identity, write_response, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::cache::IdentityCache;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    ReadingIdentity,
    AwaitingResult,
    WritingResponse,
    Closed,
    Failed,
}

/// Per-connection limits.
#[derive(Debug, Clone, Default)]
pub struct HandlerConfig {
    /// Maximum identity length in bytes; `None` is unbounded.
    pub max_identity_len: Option<usize>,
    /// Applies to reading the identity and writing the response, never to
    /// waiting on generation. `None` waits forever.
    pub io_timeout: Option<Duration>,
}

/// Why a connection ended without a response.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out in state {state:?}")]
    TimedOut { state: HandlerState },
}

/// Serves a single accepted connection.
pub struct ConnectionHandler<S> {
    stream: BufReader<S>,
    peer: SocketAddr,
    cache: IdentityCache,
    config: HandlerConfig,
    state: HandlerState,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, cache: IdentityCache, config: HandlerConfig) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer,
            cache,
            config,
            state: HandlerState::ReadingIdentity,
        }
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Drive the connection to completion and close it.
    ///
    /// Errors are logged here; the returned value is for accounting only.
    pub async fn run(mut self) -> Result<(), HandlerError> {
        let result = self.serve().await;

        match &result {
            Ok(()) => self.transition(HandlerState::Closed),
            Err(e) => {
                self.transition(HandlerState::Failed);
                self.log_failure(e);
            }
        }
        result
    }

    async fn serve(&mut self) -> Result<(), HandlerError> {
        let identity = within(
            self.config.io_timeout,
            HandlerState::ReadingIdentity,
            read_identity(&mut self.stream, self.config.max_identity_len),
        )
        .await?;
        tracing::info!(peer = %self.peer, identity = %identity, "Identity received");

        self.transition(HandlerState::AwaitingResult);
        let result = self.cache.get_or_create(&identity).await?;

        self.transition(HandlerState::WritingResponse);
        let stream = &mut self.stream;
        within(self.config.io_timeout, HandlerState::WritingResponse, async move {
            write_response(stream, &result).await?;
            stream.shutdown().await?;
            Ok::<_, HandlerError>(())
        })
        .await?;

        tracing::info!(peer = %self.peer, identity = %identity, "Response sent");
        Ok(())
    }

    fn transition(&mut self, next: HandlerState) {
        tracing::trace!(
            peer = %self.peer,
            from = ?self.state,
            to = ?next,
            "Connection state change"
        );
        self.state = next;
    }

    fn log_failure(&self, error: &HandlerError) {
        match error {
            // Clients that connect and go away are routine.
            HandlerError::Protocol(ProtocolError::MissingTerminator { received }) => {
                tracing::debug!(
                    peer = %self.peer,
                    received,
                    "Client closed before sending identity"
                );
            }
            HandlerError::Io(e) | HandlerError::Protocol(ProtocolError::Io(e))
                if e.kind() == io::ErrorKind::BrokenPipe
                    || e.kind() == io::ErrorKind::ConnectionReset =>
            {
                tracing::debug!(peer = %self.peer, error = %e, "Client disconnected");
            }
            HandlerError::Generation(e) => {
                tracing::warn!(
                    peer = %self.peer,
                    error = %e,
                    "Closing connection after generation failure"
                );
            }
            other => {
                tracing::warn!(peer = %self.peer, error = %other, "Connection failed");
            }
        }
    }
}

/// Run `fut`, optionally bounded by `limit`.
async fn within<T, E, F>(
    limit: Option<Duration>,
    state: HandlerState,
    fut: F,
) -> Result<T, HandlerError>
where
    F: Future<Output = Result<T, E>>,
    HandlerError: From<E>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(HandlerError::from),
            Err(_) => Err(HandlerError::TimedOut { state }),
        },
        None => fut.await.map_err(HandlerError::from),
    }
}
