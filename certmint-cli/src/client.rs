//! Identity request client.

use std::io;
use std::time::Duration;

use certmint_proto::{read_response, write_identity, IssuanceResult, ProtocolError};
use tokio::net::TcpStream;

/// Client-side behaviour around a single request.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Pause between sending the identity and reading the response.
    pub delay: Option<Duration>,
    /// Disconnect right after sending, as a crashed client would.
    pub exit_before_read: bool,
}

/// What a request produced.
#[derive(Debug)]
pub enum ClientOutcome {
    /// The server returned a key and certificate.
    Issued(IssuanceResult),
    /// The client disconnected before reading, by request.
    Abandoned,
}

/// Errors from a client request.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Client for one certmint daemon.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    addr: String,
}

impl IdentityClient {
    pub fn new(host: &str, port: u16) -> Self {
        let addr = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, port)
        } else {
            format!("{}:{}", host, port)
        };
        Self { addr }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Request `identity` over a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Truncated` when the server closes early; a
    /// server that fails generation closes without sending anything.
    pub async fn request(
        &self,
        identity: &str,
        options: &ClientOptions,
    ) -> Result<ClientOutcome, ClientError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        tracing::debug!(addr = %self.addr, identity = %identity, "Connected");

        write_identity(&mut stream, identity).await?;

        if options.exit_before_read {
            tracing::info!(identity = %identity, "Disconnecting before reading response");
            return Ok(ClientOutcome::Abandoned);
        }

        if let Some(delay) = options.delay {
            tracing::info!(delay_secs = delay.as_secs_f64(), "Delaying before reading response");
            tokio::time::sleep(delay).await;
        }

        let result = read_response(&mut stream).await?;
        tracing::debug!(
            key_len = result.key_pem().len(),
            cert_len = result.cert_pem().len(),
            "Response received"
        );
        Ok(ClientOutcome::Issued(result))
    }
}
