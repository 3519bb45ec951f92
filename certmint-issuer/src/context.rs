//! Issuer context: the signing key and name every leaf is issued under.

use std::fmt;

use rcgen::{CertificateParams, Issuer, KeyPair, SignatureAlgorithm};
use time::{Duration, OffsetDateTime};

use crate::error::{GenerationError, IssuerError};
use crate::key::load_issuer_key;
use crate::name::parse_distinguished_name;

/// Validity window applied to every issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityPolicy {
    /// How far before issuance `notBefore` is placed (absorbs clock skew).
    pub backdate: Duration,
    /// How long after issuance `notAfter` is placed.
    pub lifetime: Duration,
}

impl Default for ValidityPolicy {
    fn default() -> Self {
        Self {
            backdate: Duration::days(1),
            lifetime: Duration::days(365),
        }
    }
}

impl ValidityPolicy {
    /// Build a policy from whole days.
    pub fn from_days(backdate_days: u32, validity_days: u32) -> Self {
        Self {
            backdate: Duration::days(i64::from(backdate_days)),
            lifetime: Duration::days(i64::from(validity_days)),
        }
    }

    /// Compute `(notBefore, notAfter)` relative to `now`.
    ///
    /// Fails when either bound falls outside the years 0 to 9999 that an
    /// X.509 `GeneralizedTime` can hold.
    pub fn window(
        &self,
        now: OffsetDateTime,
    ) -> Result<(OffsetDateTime, OffsetDateTime), GenerationError> {
        let not_before = now
            .checked_sub(self.backdate)
            .filter(|t| t.year() >= 0)
            .ok_or_else(|| {
                GenerationError::Signing(format!("notBefore out of range ({} back)", self.backdate))
            })?;
        let not_after = now
            .checked_add(self.lifetime)
            .filter(|t| t.year() <= 9999)
            .ok_or_else(|| {
                GenerationError::Signing(format!("notAfter out of range ({} ahead)", self.lifetime))
            })?;
        Ok((not_before, not_after))
    }

    /// Check that a window starting now is representable.
    pub fn check(&self) -> Result<(), GenerationError> {
        self.window(OffsetDateTime::now_utc()).map(|_| ())
    }
}

/// Everything needed to sign leaves on behalf of one issuer.
///
/// Constructed once at startup and never mutated afterwards, so it can be
/// shared across threads without locking.
pub struct IssuerContext {
    issuer: Issuer<'static, KeyPair>,
    name: String,
    signature_algorithm: &'static SignatureAlgorithm,
    validity: ValidityPolicy,
}

impl IssuerContext {
    /// Build a context from an issuer key and distinguished name.
    pub fn new(
        key: KeyPair,
        distinguished_name: &str,
        validity: ValidityPolicy,
    ) -> Result<Self, IssuerError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = parse_distinguished_name(distinguished_name)?;

        let signature_algorithm = key.algorithm();
        Ok(Self {
            issuer: Issuer::new(params, key),
            name: distinguished_name.trim().to_string(),
            signature_algorithm,
            validity,
        })
    }

    /// Build a context from PEM key text (PKCS#8 or PKCS#1).
    pub fn from_pem(
        key_pem: &str,
        distinguished_name: &str,
        validity: ValidityPolicy,
    ) -> Result<Self, IssuerError> {
        let key = load_issuer_key(key_pem)?;
        Self::new(key, distinguished_name, validity)
    }

    /// The issuer name as given at startup.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signature algorithm used for every leaf, derived from the issuer key.
    pub fn signature_algorithm(&self) -> &'static SignatureAlgorithm {
        self.signature_algorithm
    }

    pub fn validity(&self) -> ValidityPolicy {
        self.validity
    }

    pub(crate) fn issuer(&self) -> &Issuer<'static, KeyPair> {
        &self.issuer
    }
}

impl fmt::Debug for IssuerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuerContext")
            .field("name", &self.name)
            .field("signature_algorithm", &self.signature_algorithm)
            .field("validity", &self.validity)
            .finish_non_exhaustive()
    }
}
