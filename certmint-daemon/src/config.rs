//! Daemon configuration.
//!
//! Positional arguments carry what every deployment needs; tuning lives in
//! an optional TOML file. Explicit flags override the file, and built-in
//! defaults fill whatever is left.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use certmint_issuer::{KeyAlgorithm, ValidityPolicy};
use clap::Parser;
use serde::Deserialize;

use crate::cache::FailurePolicy;
use crate::handler::HandlerConfig;
use crate::listener::ListenerConfig;

/// Default bound on identity length in bytes.
pub const DEFAULT_MAX_IDENTITY_LEN: usize = 1024;

/// certmint daemon - mints a key and certificate per identity on demand
#[derive(Parser, Debug, Clone)]
#[command(name = "certmint-daemon", version, about)]
pub struct Cli {
    /// TCP port to listen on
    pub port: u16,

    /// Issuer private key file (PEM, PKCS#8 or PKCS#1)
    pub issuer_key: PathBuf,

    /// Issuer distinguished name (e.g. "CN=Example CA,O=Example")
    pub issuer_dn: String,

    /// Number of concurrent certificate generations
    pub pool_size: usize,

    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// TOML configuration file with tuning options
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Leaf key algorithm (rsa-2048, rsa-3072, rsa-4096, rsa-8192, ecdsa-p256)
    #[arg(long)]
    pub key_algorithm: Option<KeyAlgorithm>,

    /// What to do with a failed generation
    #[arg(long, value_enum)]
    pub failure_policy: Option<FailurePolicy>,

    /// Maximum identity length in bytes (0 = unbounded)
    #[arg(long)]
    pub max_identity_len: Option<usize>,

    /// Per-connection read/write timeout in seconds
    #[arg(long)]
    pub io_timeout_secs: Option<u64>,

    /// Maximum concurrently served connections
    #[arg(long)]
    pub max_connections: Option<usize>,
}

/// Errors raised while assembling [`Settings`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Contents of the optional TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub generation: GenerationSection,
    pub connections: ConnectionsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationSection {
    pub key_algorithm: Option<String>,
    pub backdate_days: Option<u32>,
    pub validity_days: Option<u32>,
    pub failure_policy: Option<FailurePolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionsSection {
    pub max_identity_len: Option<usize>,
    pub io_timeout_secs: Option<u64>,
    pub max_connections: Option<usize>,
}

impl FileConfig {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub issuer_key: PathBuf,
    pub issuer_dn: String,
    pub pool_size: usize,
    pub key_algorithm: KeyAlgorithm,
    pub validity: ValidityPolicy,
    pub failure_policy: FailurePolicy,
    pub max_identity_len: Option<usize>,
    pub io_timeout: Option<Duration>,
    pub max_connections: Option<usize>,
}

impl Settings {
    /// Resolve settings from parsed arguments, reading `--config` if given.
    pub fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::from_parts(cli, file)
    }

    /// Merge arguments over file config over defaults, then validate.
    pub fn from_parts(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        if cli.pool_size == 0 {
            return Err(ConfigError::Invalid("pool size must be at least 1".to_string()));
        }

        let key_algorithm = match (cli.key_algorithm, &file.generation.key_algorithm) {
            (Some(alg), _) => alg,
            (None, Some(name)) => name
                .parse()
                .map_err(|e: certmint_issuer::IssuerError| ConfigError::Invalid(e.to_string()))?,
            (None, None) => KeyAlgorithm::default(),
        };

        let defaults = ValidityPolicy::default();
        let validity_days = file
            .generation
            .validity_days
            .unwrap_or(defaults.lifetime.whole_days() as u32);
        if validity_days == 0 {
            return Err(ConfigError::Invalid("validity_days must be at least 1".to_string()));
        }
        let backdate_days = file
            .generation
            .backdate_days
            .unwrap_or(defaults.backdate.whole_days() as u32);
        let validity = ValidityPolicy::from_days(backdate_days, validity_days);
        validity.check().map_err(|_| {
            ConfigError::Invalid(format!(
                "validity window of {} days back and {} days ahead falls outside years 0 to 9999",
                backdate_days, validity_days
            ))
        })?;

        let failure_policy = cli
            .failure_policy
            .or(file.generation.failure_policy)
            .unwrap_or_default();

        let max_identity_len = match cli
            .max_identity_len
            .or(file.connections.max_identity_len)
            .unwrap_or(DEFAULT_MAX_IDENTITY_LEN)
        {
            0 => None,
            n => Some(n),
        };

        let io_timeout = match cli.io_timeout_secs.or(file.connections.io_timeout_secs) {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "io_timeout_secs must be at least 1".to_string(),
                ))
            }
            other => other.map(Duration::from_secs),
        };

        let max_connections = match cli.max_connections.or(file.connections.max_connections) {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "max_connections must be at least 1".to_string(),
                ))
            }
            other => other,
        };

        Ok(Self {
            listen_addr: SocketAddr::new(cli.bind, cli.port),
            issuer_key: cli.issuer_key,
            issuer_dn: cli.issuer_dn,
            pool_size: cli.pool_size,
            key_algorithm,
            validity,
            failure_policy,
            max_identity_len,
            io_timeout,
            max_connections,
        })
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            max_identity_len: self.max_identity_len,
            io_timeout: self.io_timeout,
        }
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            max_connections: self.max_connections,
            handler: self.handler_config(),
        }
    }
}
