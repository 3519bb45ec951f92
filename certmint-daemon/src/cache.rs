//! Identity-keyed memoizing cache.
//!
//! Each identity maps to either a pending generation or its settled
//! outcome. The first requester inserts the pending entry and launches the
//! generation; everyone else attaches to the same completion signal. The
//! check and insert happen under one shard lock, so at most one generation
//! is ever in flight per identity.
//!
//! Generations run on detached tasks and are never cancelled, even if every
//! requester disconnects. Successful results stay cached for the life of
//! the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use certmint_issuer::GenerationError;
use certmint_proto::IssuanceResult;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::watch;

use crate::pool::GeneratorPool;

/// Result shared with every requester of an identity.
pub type Outcome = Result<Arc<IssuanceResult>, GenerationError>;

type Completion = watch::Receiver<Option<Outcome>>;

/// How a failed generation is remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Drop the entry so the next request retries. Requesters already
    /// waiting all receive the same error.
    #[default]
    Evict,
    /// Keep the error; later requests fail without regenerating.
    Cache,
}

#[derive(Clone)]
enum CacheEntry {
    Pending(Completion),
    Settled(Outcome),
}

/// Observable state of one identity, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Ready,
    Failed,
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Hit,
    Coalesced,
    Miss,
}

#[derive(Default)]
struct CacheMetrics {
    hits: AtomicU64,
    coalesced: AtomicU64,
    misses: AtomicU64,
    generations_succeeded: AtomicU64,
    generations_failed: AtomicU64,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    /// Requests answered from a settled entry.
    pub hits: u64,
    /// Requests that attached to a generation already in flight.
    pub coalesced: u64,
    /// Requests that launched a generation.
    pub misses: u64,
    pub generations_succeeded: u64,
    pub generations_failed: u64,
    /// Identities currently present (pending or settled).
    pub entries: usize,
}

struct Inner {
    entries: DashMap<String, CacheEntry>,
    pool: GeneratorPool,
    policy: FailurePolicy,
    metrics: CacheMetrics,
}

/// Shared handle to the identity cache.
#[derive(Clone)]
pub struct IdentityCache {
    inner: Arc<Inner>,
}

impl IdentityCache {
    pub fn new(pool: GeneratorPool, policy: FailurePolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                pool,
                policy,
                metrics: CacheMetrics::default(),
            }),
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.inner.policy
    }

    /// Return the result for `identity`, generating it at most once.
    ///
    /// Concurrent callers for the same identity all observe the same
    /// outcome. Dropping the returned future does not cancel generation.
    pub async fn get_or_create(&self, identity: &str) -> Outcome {
        let (completion, sender) = match self.inner.entries.entry(identity.to_string()) {
            Entry::Occupied(entry) => match entry.get() {
                CacheEntry::Settled(outcome) => {
                    self.record(identity, Lookup::Hit);
                    return outcome.clone();
                }
                CacheEntry::Pending(completion) => {
                    self.record(identity, Lookup::Coalesced);
                    (completion.clone(), None)
                }
            },
            Entry::Vacant(entry) => {
                let (sender, completion) = watch::channel(None);
                entry.insert(CacheEntry::Pending(completion.clone()));
                self.record(identity, Lookup::Miss);
                (completion, Some(sender))
            }
        };

        // Shard lock is released; safe to start work that touches the map.
        if let Some(sender) = sender {
            self.spawn_generation(identity.to_string(), sender);
        }

        self.wait(identity, completion).await
    }

    /// Current state of `identity`, if present.
    pub fn state(&self, identity: &str) -> Option<EntryState> {
        self.inner.entries.get(identity).map(|entry| match entry.value() {
            CacheEntry::Pending(_) => EntryState::Pending,
            CacheEntry::Settled(Ok(_)) => EntryState::Ready,
            CacheEntry::Settled(Err(_)) => EntryState::Failed,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        let m = &self.inner.metrics;
        CacheMetricsSnapshot {
            hits: m.hits.load(Ordering::Relaxed),
            coalesced: m.coalesced.load(Ordering::Relaxed),
            misses: m.misses.load(Ordering::Relaxed),
            generations_succeeded: m.generations_succeeded.load(Ordering::Relaxed),
            generations_failed: m.generations_failed.load(Ordering::Relaxed),
            entries: self.inner.entries.len(),
        }
    }

    fn record(&self, identity: &str, lookup: Lookup) {
        let m = &self.inner.metrics;
        match lookup {
            Lookup::Hit => {
                m.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(identity = %identity, "Cache hit");
            }
            Lookup::Coalesced => {
                m.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(identity = %identity, "Attached to pending generation");
            }
            Lookup::Miss => {
                m.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(identity = %identity, "Cache miss");
            }
        }
    }

    fn spawn_generation(&self, identity: String, sender: watch::Sender<Option<Outcome>>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let started = Instant::now();
            tracing::info!(identity = %identity, "Generation started");

            let outcome = inner.pool.run(identity.clone()).await.map(Arc::new);
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match &outcome {
                Ok(_) => {
                    inner
                        .metrics
                        .generations_succeeded
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::info!(identity = %identity, elapsed_ms, "Generation finished");
                }
                Err(e) => {
                    inner
                        .metrics
                        .generations_failed
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        identity = %identity,
                        elapsed_ms,
                        error = %e,
                        "Generation failed"
                    );
                }
            }

            // Map first, then waiters: anyone arriving after the send sees
            // the settled entry rather than a finished pending one.
            inner.settle(&identity, &outcome);
            sender.send_replace(Some(outcome));
        });
    }

    async fn wait(&self, identity: &str, mut completion: Completion) -> Outcome {
        let settled = match completion.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };

        match settled {
            Some(outcome) => outcome,
            None => {
                // The generation task went away without settling.
                let err = GenerationError::Interrupted("generation task stopped".to_string());
                self.inner.abandon(identity, &completion, &err);
                Err(err)
            }
        }
    }
}

impl Inner {
    fn settle(&self, identity: &str, outcome: &Outcome) {
        match (outcome, self.policy) {
            (Err(_), FailurePolicy::Evict) => {
                self.entries.remove(identity);
            }
            _ => {
                self.entries
                    .insert(identity.to_string(), CacheEntry::Settled(outcome.clone()));
            }
        }
    }

    /// Replace a pending entry whose generation task vanished, but only if
    /// it is still the same pending entry.
    fn abandon(&self, identity: &str, completion: &Completion, err: &GenerationError) {
        let is_ours = |entry: &CacheEntry| {
            matches!(entry, CacheEntry::Pending(pending) if pending.same_channel(completion))
        };

        match self.policy {
            FailurePolicy::Evict => {
                self.entries.remove_if(identity, |_, entry| is_ours(entry));
            }
            FailurePolicy::Cache => {
                if let Some(mut entry) = self.entries.get_mut(identity) {
                    if is_ours(entry.value()) {
                        *entry = CacheEntry::Settled(Err(err.clone()));
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.inner.entries.len())
            .field("policy", &self.inner.policy)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Generate;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Counts calls per identity; optionally fails the first N calls.
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        per_identity: Mutex<Vec<String>>,
        fail_first: AtomicUsize,
        delay: Duration,
    }

    impl Counting {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn failing(times: usize) -> Self {
            let gen = Self::default();
            gen.fail_first.store(times, Ordering::SeqCst);
            gen
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Generate for Counting {
        fn generate(&self, identity: &str) -> Result<IssuanceResult, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.per_identity.lock().unwrap().push(identity.to_string());
            std::thread::sleep(self.delay);

            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(GenerationError::KeyGeneration("injected".to_string()));
            }
            Ok(IssuanceResult::new(
                format!("key-{}-{}", identity, n).into_bytes(),
                format!("cert-{}-{}", identity, n).into_bytes(),
            ))
        }
    }

    fn cache_with(gen: Arc<Counting>, pool_size: usize, policy: FailurePolicy) -> IdentityCache {
        IdentityCache::new(GeneratorPool::new(gen, pool_size), policy)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_generation() {
        let gen = Arc::new(Counting::slow(Duration::from_millis(200)));
        let cache = cache_with(gen.clone(), 2, FailurePolicy::Evict);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get_or_create("bob").await }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(gen.calls(), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));

        let metrics = cache.metrics();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.coalesced + metrics.hits, 4);
        assert_eq!(metrics.generations_succeeded, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_generation_count_equals_distinct_identities() {
        let gen = Arc::new(Counting::slow(Duration::from_millis(20)));
        let cache = cache_with(gen.clone(), 3, FailurePolicy::Evict);

        let identities = ["alice", "bob", "carol", "dave"];
        let mut handles = Vec::new();
        for round in 0..6 {
            for identity in identities {
                let cache = cache.clone();
                handles.push(tokio::spawn(async move {
                    if round % 2 == 0 {
                        tokio::task::yield_now().await;
                    }
                    (identity, cache.get_or_create(identity).await.unwrap())
                }));
            }
        }

        let mut by_identity: Vec<(&str, Arc<IssuanceResult>)> = Vec::new();
        for handle in handles {
            by_identity.push(handle.await.unwrap());
        }

        assert_eq!(gen.calls(), identities.len());
        let generated: HashSet<String> = gen.per_identity.lock().unwrap().iter().cloned().collect();
        assert_eq!(generated.len(), identities.len());

        for (identity, result) in &by_identity {
            let first = by_identity.iter().find(|(id, _)| id == identity).unwrap();
            assert_eq!(result.as_ref(), first.1.as_ref());
        }
        assert_eq!(cache.len(), identities.len());
    }

    #[tokio::test]
    async fn test_later_request_is_a_hit() {
        let gen = Arc::new(Counting::default());
        let cache = cache_with(gen.clone(), 1, FailurePolicy::Evict);

        let first = cache.get_or_create("alice").await.unwrap();
        assert_eq!(cache.state("alice"), Some(EntryState::Ready));

        let second = cache.get_or_create("alice").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(gen.calls(), 1);
        assert_eq!(cache.metrics().hits, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_requester_does_not_cancel() {
        let gen = Arc::new(Counting::slow(Duration::from_millis(100)));
        let cache = cache_with(gen.clone(), 1, FailurePolicy::Evict);

        let requester = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_create("carol").await })
        };
        // let the requester register, then abandon it
        tokio::time::sleep(Duration::from_millis(20)).await;
        requester.abort();
        assert_eq!(cache.state("carol"), Some(EntryState::Pending));

        tokio::time::timeout(Duration::from_secs(5), async {
            while cache.state("carol") != Some(EntryState::Ready) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("generation should complete without any requester");

        cache.get_or_create("carol").await.unwrap();
        assert_eq!(gen.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_evict_policy_shares_error_then_retries() {
        let gen = Arc::new(Counting {
            delay: Duration::from_millis(100),
            ..Counting::failing(1)
        });
        let cache = cache_with(gen.clone(), 1, FailurePolicy::Evict);

        let mut handles = Vec::new();
        for _ in 0..3 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get_or_create("erin").await }));
        }
        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err, GenerationError::KeyGeneration("injected".to_string()));
        }
        assert_eq!(gen.calls(), 1);
        assert_eq!(cache.state("erin"), None);

        cache.get_or_create("erin").await.unwrap();
        assert_eq!(gen.calls(), 2);
        assert_eq!(cache.metrics().generations_failed, 1);
    }

    #[tokio::test]
    async fn test_cache_policy_keeps_error() {
        let gen = Arc::new(Counting::failing(1));
        let cache = cache_with(gen.clone(), 1, FailurePolicy::Cache);

        assert!(cache.get_or_create("frank").await.is_err());
        assert_eq!(cache.state("frank"), Some(EntryState::Failed));

        let err = cache.get_or_create("frank").await.unwrap_err();
        assert!(matches!(err, GenerationError::KeyGeneration(_)));
        assert_eq!(gen.calls(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_pending_entry_is_replaced() {
        let gen = Arc::new(Counting::default());
        let cache = cache_with(gen, 1, FailurePolicy::Evict);

        // A pending entry whose sender is already gone.
        let (sender, completion) = watch::channel(None);
        drop(sender);
        cache
            .inner
            .entries
            .insert("ghost".to_string(), CacheEntry::Pending(completion));

        let err = cache.get_or_create("ghost").await.unwrap_err();
        assert!(matches!(err, GenerationError::Interrupted(_)));
        assert_eq!(cache.state("ghost"), None);

        cache.get_or_create("ghost").await.unwrap();
        assert_eq!(cache.state("ghost"), Some(EntryState::Ready));
    }
}
