//! CLI argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::client::ClientOptions;

/// certmint client - request a key and certificate for an identity
#[derive(Parser, Debug)]
#[command(name = "certmint", version, about)]
pub struct Args {
    /// Daemon host name or address
    pub host: String,

    /// Daemon port
    pub port: u16,

    /// Identity to request (becomes the certificate CN)
    pub identity: String,

    /// Output prefix; writes <PREFIX>.key and <PREFIX>.crt
    #[arg(value_name = "PREFIX")]
    pub output_prefix: PathBuf,

    /// Seconds to wait after sending the request before reading the response
    #[arg(value_name = "DELAY_SECONDS", default_value_t = 0)]
    pub delay_seconds: u64,

    /// "exit" disconnects right after sending, without reading the response
    #[arg(value_enum, ignore_case = true, value_name = "exit")]
    pub after_send: Option<AfterSend>,
}

/// Fault injection after the request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AfterSend {
    /// Close the connection without reading.
    Exit,
}

impl Args {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            delay: (self.delay_seconds > 0).then(|| Duration::from_secs(self.delay_seconds)),
            exit_before_read: self.after_send == Some(AfterSend::Exit),
        }
    }
}
