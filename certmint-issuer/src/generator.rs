//! Leaf identity generation.

use std::fmt;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{CertificateParams, DistinguishedName, DnType, SerialNumber};
use time::OffsetDateTime;

use crate::context::IssuerContext;
use crate::error::GenerationError;
use crate::key::KeyAlgorithm;

/// Serial number length in bytes (159 random bits once the sign bit is cleared).
const SERIAL_LEN: usize = 20;

/// A freshly minted private key and the certificate binding it to an identity.
#[derive(Clone)]
pub struct IssuedIdentity {
    /// PKCS#8 private key, PEM encoded.
    pub key_pem: String,
    /// X.509 certificate, PEM encoded.
    pub cert_pem: String,
}

impl fmt::Debug for IssuedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedIdentity")
            .field("key_pem_len", &self.key_pem.len())
            .field("cert_pem_len", &self.cert_pem.len())
            .finish()
    }
}

/// Mints key pairs and certificates under a shared [`IssuerContext`].
///
/// Generation is CPU bound and blocking; callers are expected to run it on a
/// dedicated worker pool rather than on an async executor thread.
#[derive(Debug, Clone)]
pub struct Generator {
    issuer: Arc<IssuerContext>,
    algorithm: KeyAlgorithm,
}

impl Generator {
    pub fn new(issuer: Arc<IssuerContext>, algorithm: KeyAlgorithm) -> Self {
        Self { issuer, algorithm }
    }

    pub fn issuer(&self) -> &IssuerContext {
        &self.issuer
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Generate a new key pair and a certificate with subject `CN=<identity>`.
    ///
    /// Every call produces a distinct key and serial; deduplication is the
    /// caller's concern.
    pub fn generate(&self, identity: &str) -> Result<IssuedIdentity, GenerationError> {
        let leaf_key = self.algorithm.generate()?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, identity);
        params.serial_number = Some(random_serial());

        let (not_before, not_after) = self.issuer.validity().window(OffsetDateTime::now_utc())?;
        params.not_before = not_before;
        params.not_after = not_after;

        let cert = params
            .signed_by(&leaf_key, self.issuer.issuer())
            .map_err(|e| GenerationError::Signing(e.to_string()))?;

        Ok(IssuedIdentity {
            key_pem: leaf_key.into_private_key_pem(),
            cert_pem: cert.pem(),
        })
    }
}

/// Random positive serial number from the OS CSPRNG.
fn random_serial() -> SerialNumber {
    let mut bytes = vec![0u8; SERIAL_LEN];
    OsRng.fill_bytes(&mut bytes);
    // DER INTEGER is signed; keep it positive
    bytes[0] &= 0x7f;
    SerialNumber::from(bytes)
}
