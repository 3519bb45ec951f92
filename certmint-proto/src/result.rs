//! Issued key and certificate pair.

use std::fmt;

/// Immutable PEM key and certificate returned for an identity.
///
/// Contents are treated as opaque bytes on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuanceResult {
    key_pem: Vec<u8>,
    cert_pem: Vec<u8>,
}

impl IssuanceResult {
    pub fn new(key_pem: impl Into<Vec<u8>>, cert_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            key_pem: key_pem.into(),
            cert_pem: cert_pem.into(),
        }
    }

    /// PEM encoded private key.
    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }

    /// PEM encoded certificate.
    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.key_pem, self.cert_pem)
    }
}

impl fmt::Debug for IssuanceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuanceResult")
            .field("key_pem_len", &self.key_pem.len())
            .field("cert_pem_len", &self.cert_pem.len())
            .finish()
    }
}
