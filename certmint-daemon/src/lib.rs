//! certmint daemon library.
//!
//! Wires the issuer, generator pool, identity cache and TCP listener
//! together. The binary in `main.rs` only parses arguments, installs
//! logging and signal handlers, and calls into [`Daemon`].

pub mod cache;
pub mod config;
pub mod handler;
pub mod listener;
pub mod pool;
pub mod shutdown;
pub mod startup;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use certmint_issuer::Generator;

pub use cache::{CacheMetricsSnapshot, EntryState, FailurePolicy, IdentityCache};
pub use config::{Cli, ConfigError, Settings};
pub use handler::{ConnectionHandler, HandlerConfig, HandlerError, HandlerState};
pub use listener::{Listener, ListenerConfig, ServeSummary};
pub use pool::{Generate, GeneratorPool};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use startup::{load_issuer, StartupError};

/// A bound, ready-to-serve daemon.
pub struct Daemon {
    listener: Listener,
    cache: IdentityCache,
}

impl Daemon {
    /// Load the issuer key, build the generator and bind the listener.
    pub async fn start(settings: &Settings) -> Result<Self, StartupError> {
        let issuer =
            load_issuer(&settings.issuer_key, &settings.issuer_dn, settings.validity).await?;
        let generator = Generator::new(Arc::new(issuer), settings.key_algorithm);
        tracing::info!(
            key_algorithm = %settings.key_algorithm,
            pool_size = settings.pool_size,
            failure_policy = ?settings.failure_policy,
            "Generator ready"
        );
        Self::with_generator(settings, Arc::new(generator)).await
    }

    /// Bind using an arbitrary generator.
    pub async fn with_generator(
        settings: &Settings,
        generator: Arc<dyn Generate>,
    ) -> Result<Self, StartupError> {
        let pool = GeneratorPool::new(generator, settings.pool_size);
        let cache = IdentityCache::new(pool, settings.failure_policy);
        let listener = Listener::bind(
            settings.listen_addr,
            cache.clone(),
            settings.listener_config(),
        )
        .await
        .map_err(|source| StartupError::Bind {
            addr: settings.listen_addr,
            source,
        })?;
        Ok(Self { listener, cache })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Serve until shutdown or a fatal accept error.
    pub async fn serve(self, shutdown: ShutdownSignal) -> io::Result<ServeSummary> {
        self.listener.serve(shutdown).await
    }
}
