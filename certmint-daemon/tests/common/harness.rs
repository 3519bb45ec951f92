//! Test harness: a real daemon on an ephemeral localhost port.
//!
//! The issuer and leaves use ECDSA P-256 so tests stay fast. Generation goes
//! through an instrumented wrapper around the real generator, so tests can
//! count invocations, slow them down, or inject failures.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use certmint_daemon::{
    Daemon, FailurePolicy, Generate, IdentityCache, ServeSummary, Settings, ShutdownCoordinator,
};
use certmint_issuer::{GenerationError, Generator, IssuerContext, KeyAlgorithm, ValidityPolicy};
use certmint_proto::{read_response, write_identity, IssuanceResult, ProtocolError};
use rcgen::{KeyPair, PublicKeyData};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use x509_parser::pem::parse_x509_pem;

pub const ISSUER_DN: &str = "CN=certmint test CA,O=certmint";

/// Real generator with call counting, optional delay and injected failures.
pub struct CountingGenerator {
    inner: Generator,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    fail_first: AtomicUsize,
    delay: Duration,
}

impl CountingGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of generations observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Generate for CountingGenerator {
    fn generate(&self, identity: &str) -> Result<IssuanceResult, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        std::thread::sleep(self.delay);
        let result = if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            Err(GenerationError::KeyGeneration("injected failure".to_string()))
        } else {
            Generate::generate(&self.inner, identity)
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Knobs for [`TestDaemon::with_options`].
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub pool_size: usize,
    pub delay: Duration,
    pub fail_first: usize,
    pub failure_policy: FailurePolicy,
    pub max_identity_len: Option<usize>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            pool_size: 2,
            delay: Duration::ZERO,
            fail_first: 0,
            failure_policy: FailurePolicy::Evict,
            max_identity_len: Some(1024),
        }
    }
}

/// Daemon listening on 127.0.0.1 with an ephemeral port.
pub struct TestDaemon {
    pub addr: SocketAddr,
    pub generator: Arc<CountingGenerator>,
    /// Issuer SubjectPublicKeyInfo, DER encoded.
    pub issuer_spki: Vec<u8>,
    cache: IdentityCache,
    coordinator: ShutdownCoordinator,
    handle: JoinHandle<io::Result<ServeSummary>>,
}

impl TestDaemon {
    pub async fn start() -> Self {
        Self::with_options(TestOptions::default()).await
    }

    pub async fn with_options(options: TestOptions) -> Self {
        let issuer_key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .expect("Failed to generate issuer key");
        let issuer_spki = issuer_key.subject_public_key_info();
        let issuer = IssuerContext::new(issuer_key, ISSUER_DN, ValidityPolicy::default())
            .expect("Failed to build issuer context");

        let generator = Arc::new(CountingGenerator {
            inner: Generator::new(Arc::new(issuer), KeyAlgorithm::EcdsaP256),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(options.fail_first),
            delay: options.delay,
        });

        let settings = Settings {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            issuer_key: PathBuf::new(),
            issuer_dn: ISSUER_DN.to_string(),
            pool_size: options.pool_size,
            key_algorithm: KeyAlgorithm::EcdsaP256,
            validity: ValidityPolicy::default(),
            failure_policy: options.failure_policy,
            max_identity_len: options.max_identity_len,
            io_timeout: None,
            max_connections: None,
        };

        let daemon = Daemon::with_generator(&settings, generator.clone())
            .await
            .expect("Failed to bind test daemon");
        let addr = daemon.local_addr().expect("Failed to read local address");
        let cache = daemon.cache().clone();

        let coordinator = ShutdownCoordinator::new();
        let handle = tokio::spawn(daemon.serve(coordinator.signal()));

        Self {
            addr,
            generator,
            issuer_spki,
            cache,
            coordinator,
            handle,
        }
    }

    pub fn generations(&self) -> usize {
        self.generator.calls()
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Poll until `identity` is settled successfully in the cache.
    pub async fn wait_until_cached(&self, identity: &str) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.cache.state(identity) != Some(certmint_daemon::EntryState::Ready) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("identity was never cached");
    }

    /// Whether the listener task is still running.
    pub fn is_serving(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the accept loop and return its summary.
    pub async fn stop(self) -> ServeSummary {
        self.coordinator.shutdown();
        self.handle
            .await
            .expect("Listener task panicked")
            .expect("Listener returned an error")
    }
}

/// Send one identity request and read the full response.
pub async fn request(addr: SocketAddr, identity: &str) -> Result<IssuanceResult, ProtocolError> {
    let mut stream = TcpStream::connect(addr).await?;
    write_identity(&mut stream, identity).await?;
    read_response(&mut stream).await
}

/// Decode a PEM certificate blob to DER.
pub fn cert_der(cert_pem: &[u8]) -> Vec<u8> {
    let (_, pem) = parse_x509_pem(cert_pem).expect("Certificate is not valid PEM");
    assert_eq!(pem.label, "CERTIFICATE");
    pem.contents
}
