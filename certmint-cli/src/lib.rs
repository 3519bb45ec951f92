//! certmint client library.
//!
//! Used by the `certmint` binary; also handy for driving a daemon from
//! tests, including the slow-reader and crashed-client fault modes.

pub mod args;
pub mod client;
pub mod output;

pub use args::{AfterSend, Args};
pub use client::{ClientError, ClientOptions, ClientOutcome, IdentityClient};
pub use output::{output_paths, save};
