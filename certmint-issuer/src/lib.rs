//! Pure certificate issuance library for certmint.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! Callers read the issuer key themselves and hand the PEM text to
//! [`IssuerContext::from_pem`]. The resulting context is immutable and can be
//! shared across threads behind an `Arc`.
//!
//! # Example
//!
//! ```ignore
//! use certmint_issuer::{Generator, IssuerContext, KeyAlgorithm, ValidityPolicy};
//!
//! let validity = ValidityPolicy::default();
//! let issuer = IssuerContext::from_pem(&pem, "CN=Example CA,O=Example", validity)?;
//! let generator = Generator::new(Arc::new(issuer), KeyAlgorithm::default());
//! let issued = generator.generate("alice")?;
//! ```

pub mod context;
pub mod error;
pub mod generator;
pub mod key;
pub mod name;

pub use context::{IssuerContext, ValidityPolicy};
pub use error::{GenerationError, IssuerError};
pub use generator::{Generator, IssuedIdentity};
pub use key::{KeyAlgorithm, LeafKey, MAX_ISSUER_RSA_BITS};
pub use name::parse_distinguished_name;
