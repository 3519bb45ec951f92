//! Wire protocol for the certmint identity service.
//!
//! One request/response per TCP connection:
//!
//! ```text
//! client -> server:  identity bytes, 0x00
//! server -> client:  u32be key_len, key_pem, u32be cert_len, cert_pem, close
//! ```
//!
//! There is no in-band error signal; the server reports failure by closing
//! the connection without writing a response.

pub mod error;
pub mod framing;
pub mod result;

pub use error::ProtocolError;
pub use framing::{
    encode_response, read_identity, read_response, write_identity, write_response,
    IDENTITY_TERMINATOR, MAX_FRAME_SIZE,
};
pub use result::IssuanceResult;
