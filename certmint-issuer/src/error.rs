//! Issuer error types.

/// Errors raised while building an [`IssuerContext`](crate::IssuerContext).
///
/// These are startup failures; the daemon refuses to start on any of them.
#[derive(Debug, thiserror::Error)]
pub enum IssuerError {
    /// The issuer distinguished name could not be parsed.
    #[error("invalid distinguished name: {0}")]
    InvalidName(String),

    /// The PEM block is not a private key format we understand.
    #[error("unsupported issuer key format: {0}")]
    UnsupportedKeyFormat(String),

    /// The key was recognised but could not be loaded.
    #[error("invalid issuer key: {0}")]
    InvalidKey(String),

    /// Unknown or unsupported leaf key algorithm name.
    #[error("unknown key algorithm {0:?} (expected rsa-{{2048,3072,4096,8192}} or ecdsa-p256)")]
    UnknownAlgorithm(String),
}

/// Errors raised while minting a leaf identity.
///
/// Cloneable so a single failure can be handed to every requester that
/// coalesced onto the same generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Fresh key pair generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Building or signing the certificate failed.
    #[error("certificate signing failed: {0}")]
    Signing(String),

    /// The generation task stopped before producing a result.
    #[error("generation interrupted: {0}")]
    Interrupted(String),
}
