//! Startup: issuer loading and listener binding.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use certmint_issuer::{IssuerContext, IssuerError, ValidityPolicy};

/// Errors that prevent the daemon from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to read issuer key {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Issuer(#[from] IssuerError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Read the issuer key file and build the issuer context.
pub async fn load_issuer(
    key_path: &Path,
    distinguished_name: &str,
    validity: ValidityPolicy,
) -> Result<IssuerContext, StartupError> {
    let pem = tokio::fs::read_to_string(key_path)
        .await
        .map_err(|source| StartupError::ReadKey {
            path: key_path.to_path_buf(),
            source,
        })?;

    let context = IssuerContext::from_pem(&pem, distinguished_name, validity)?;
    tracing::info!(
        path = %key_path.display(),
        issuer = %context.name(),
        algorithm = ?context.signature_algorithm(),
        "Loaded issuer key"
    );
    Ok(context)
}
