//! Bounded generator worker pool.
//!
//! Generation is CPU bound, so it runs on blocking threads. A semaphore caps
//! how many run at once; callers queue for a permit in FIFO order.

use std::sync::Arc;

use certmint_issuer::{GenerationError, Generator};
use certmint_proto::IssuanceResult;
use tokio::sync::Semaphore;

/// Something that can mint an identity. Blocking.
pub trait Generate: Send + Sync + 'static {
    fn generate(&self, identity: &str) -> Result<IssuanceResult, GenerationError>;
}

impl Generate for Generator {
    fn generate(&self, identity: &str) -> Result<IssuanceResult, GenerationError> {
        let issued = Generator::generate(self, identity)?;
        Ok(IssuanceResult::new(issued.key_pem, issued.cert_pem))
    }
}

/// Runs generations on at most `size` blocking threads at a time.
#[derive(Clone)]
pub struct GeneratorPool {
    generator: Arc<dyn Generate>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl GeneratorPool {
    pub fn new(generator: Arc<dyn Generate>, size: usize) -> Self {
        Self {
            generator,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of idle workers.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free worker and generate `identity` on it.
    ///
    /// A panic inside the generator is reported as
    /// `GenerationError::Interrupted`.
    pub async fn run(&self, identity: String) -> Result<IssuanceResult, GenerationError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| GenerationError::Interrupted("generator pool closed".to_string()))?;

        let generator = Arc::clone(&self.generator);
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            generator.generate(&identity)
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(GenerationError::Interrupted(format!(
                "generator worker failed: {}",
                e
            ))),
        }
    }
}

impl std::fmt::Debug for GeneratorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorPool")
            .field("size", &self.size)
            .field("available", &self.available())
            .finish()
    }
}
