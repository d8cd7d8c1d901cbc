//! Resilient on-chain submission.
//!
//! [`SubmissionPipeline::submit`] signs and broadcasts a data submission,
//! waits for confirmation and retries transient failures with exponential
//! backoff. Responses are cached per `(request_id, data)` so a duplicate call
//! within the TTL never reaches the chain, and concurrent duplicates wait for
//! the first one instead of submitting twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::TtlCache;
use crate::chain::{ChainClient, Receipt, Transaction};
use crate::config::SubmissionConfig;
use crate::error::{Error, ErrorClass, Result};
use crate::oracle::FeedValue;
use crate::submission::retry::RetryPolicy;

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Confirmed submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainResponse {
    /// Request the data answered
    pub request_id: u64,
    /// Transaction hash
    pub hash: String,
    /// Block that included the transaction
    pub block_number: u64,
    /// Gas consumed, when reported
    pub gas_used: Option<u64>,
}

/// Idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmissionKey {
    request_id: u64,
    data: String,
}

impl SubmissionKey {
    /// Key for `data` submitted against `request_id`
    pub fn new(request_id: u64, data: &FeedValue) -> Self {
        Self {
            request_id,
            data: data.to_json_string(),
        }
    }

    /// Short digest used in logs
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.request_id.to_be_bytes());
        hasher.update(self.data.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }
}

/// Pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Submissions confirmed on-chain
    pub submitted: u64,
    /// Calls answered from the idempotency cache
    pub cache_hits: u64,
    /// Calls that ended in an error
    pub failures: u64,
}

/// Timing of the confirmation and event phases
#[derive(Debug, Clone, PartialEq, Eq)]
struct Timing {
    poll_interval: Duration,
    confirmation_timeout: Duration,
    event_listen: Duration,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Submits finalized values to the oracle contract
pub struct SubmissionPipeline {
    chain: Arc<dyn ChainClient>,
    policy: RetryPolicy,
    timing: Timing,
    function: String,
    completion_event: String,
    cache: TtlCache<SubmissionKey, ChainResponse>,
    in_flight: Mutex<HashMap<SubmissionKey, Arc<tokio::sync::Mutex<()>>>>,
    submitted: AtomicU64,
    cache_hits: AtomicU64,
    failures: AtomicU64,
}

impl SubmissionPipeline {
    /// Create a pipeline from configuration
    pub fn new(chain: Arc<dyn ChainClient>, config: &SubmissionConfig) -> Self {
        Self {
            chain,
            policy: RetryPolicy::from(config),
            timing: Timing {
                poll_interval: Duration::from_millis(config.confirmation_poll_ms),
                confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
                event_listen: Duration::from_secs(config.event_listen_secs),
            },
            function: config.function.clone(),
            completion_event: config.completion_event.clone(),
            cache: TtlCache::new(Duration::from_secs(config.cache_ttl_secs)),
            in_flight: Mutex::new(HashMap::new()),
            submitted: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Replace the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Active retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit `data` for `request_id`, at most once per key within the TTL
    pub async fn submit(&self, request_id: u64, data: &FeedValue) -> Result<ChainResponse> {
        let key = SubmissionKey::new(request_id, data);
        if let Some(response) = self.cached(&key) {
            return Ok(response);
        }

        let lock = self
            .in_flight
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        // A concurrent duplicate may have finished while we waited
        let result = match self.cached(&key) {
            Some(response) => Ok(response),
            None => self.submit_uncached(&key, request_id, data).await,
        };

        self.release(&key, &lock);
        drop(guard);
        result
    }

    async fn submit_uncached(
        &self,
        key: &SubmissionKey,
        request_id: u64,
        data: &FeedValue,
    ) -> Result<ChainResponse> {
        let result = self.submit_with_retry(key, request_id, data).await;
        match &result {
            Ok(response) => {
                self.cache.insert(key.clone(), response.clone());
                self.submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// Drop the in-flight entry unless another caller is queued on it.
    ///
    /// Must run while the caller still holds the key's guard.
    fn release(&self, key: &SubmissionKey, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock();
        let ours = in_flight
            .get(key)
            .map_or(false, |entry| Arc::ptr_eq(entry, lock));
        // the map and this caller hold the only references
        if ours && Arc::strong_count(lock) == 2 {
            in_flight.remove(key);
        }
    }

    /// Keys with a submission in progress or queued
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn cached(&self, key: &SubmissionKey) -> Option<ChainResponse> {
        let response = self.cache.get(key)?;
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key.digest(), hash = %response.hash, "Submission served from cache");
        Some(response)
    }

    async fn submit_with_retry(
        &self,
        key: &SubmissionKey,
        request_id: u64,
        data: &FeedValue,
    ) -> Result<ChainResponse> {
        let tx = Transaction::new(
            self.function.clone(),
            vec![serde_json::json!(request_id), serde_json::to_value(data)?],
        );

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(request_id, &tx).await {
                Ok(response) => {
                    info!(
                        request_id,
                        key = %key.digest(),
                        hash = %response.hash,
                        block = response.block_number,
                        attempt,
                        "Data submitted on-chain"
                    );
                    self.listen_for_completion(request_id);
                    return Ok(response);
                }
                Err(e) => match e.classify() {
                    ErrorClass::Fatal => {
                        error!(request_id, attempt, error = %e, "Fatal submission error");
                        return Err(e);
                    }
                    ErrorClass::Retryable => {
                        warn!(
                            request_id,
                            attempt,
                            max_attempts,
                            error = %e,
                            "Submission attempt failed"
                        );
                        last_error = e.to_string();
                        if attempt < max_attempts {
                            tokio::time::sleep(self.policy.delay_for(attempt)).await;
                        }
                    }
                },
            }
        }

        error!(request_id, attempts = max_attempts, "Submission retries exhausted");
        Err(Error::SubmissionFailed {
            request_id,
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt(&self, request_id: u64, tx: &Transaction) -> Result<ChainResponse> {
        let pending = self.chain.sign_and_submit(tx).await?;
        debug!(request_id, hash = %pending.hash, "Transaction broadcast");

        let receipt = self.confirm(&pending.hash).await?;
        if !receipt.success {
            return Err(Error::Chain(format!("transaction {} reverted", receipt.hash)));
        }

        Ok(ChainResponse {
            request_id,
            hash: receipt.hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }

    /// Poll for a receipt until it arrives or the confirmation window closes
    async fn confirm(&self, hash: &str) -> Result<Receipt> {
        let started = Instant::now();
        let deadline = started + self.timing.confirmation_timeout;

        loop {
            match self.chain.wait_for_transaction(hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => debug!(hash = %hash, error = %e, "Awaiting confirmation"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ConfirmationTimeout {
                    hash: hash.to_string(),
                    waited_secs: now.duration_since(started).as_secs(),
                });
            }
            tokio::time::sleep(self.timing.poll_interval.min(deadline - now)).await;
        }
    }

    /// Watch the completion event for a while, then unsubscribe
    fn listen_for_completion(&self, request_id: u64) {
        let chain = self.chain.clone();
        let event = self.completion_event.clone();
        let window = self.timing.event_listen;

        tokio::spawn(async move {
            let mut subscription = match chain.subscribe(&event).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!(request_id, event = %event, error = %e, "Event subscription failed");
                    return;
                }
            };

            let _ = tokio::time::timeout(window, async {
                while let Some(ev) = subscription.receiver.recv().await {
                    info!(request_id, event = %ev.name, data = %ev.data, "Completion event received");
                }
            })
            .await;

            if let Err(e) = chain.unsubscribe(subscription.id).await {
                debug!(request_id, error = %e, "Unsubscribe failed");
            }
        });
    }

    /// Current gas price
    pub async fn gas_price(&self) -> Result<u64> {
        self.chain.gas_price().await
    }

    /// Gas estimate for a transaction
    pub async fn estimate_gas(&self, tx: &Transaction) -> Result<u64> {
        self.chain.estimate_gas(tx).await
    }

    /// Counters since creation
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Drop expired idempotency entries
    pub fn purge_cache(&self) -> usize {
        self.cache.purge_expired()
    }
}

impl std::fmt::Debug for SubmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionPipeline")
            .field("policy", &self.policy)
            .field("function", &self.function)
            .field("cached", &self.cache.len())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::InMemoryChain;

    fn pipeline(chain: Arc<InMemoryChain>) -> SubmissionPipeline {
        SubmissionPipeline::new(chain, &SubmissionConfig::default()).with_policy(
            RetryPolicy::fixed(5, Duration::from_secs(1), Duration::from_secs(60)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_confirms() {
        let chain = Arc::new(InMemoryChain::new());
        chain.set_confirmation_polls(2);
        let pipeline = pipeline(chain.clone());

        let started = Instant::now();
        let response = pipeline.submit(1, &FeedValue::from(2000.0)).await.unwrap();
        assert_eq!(response.request_id, 1);
        assert_eq!(response.block_number, 1);
        assert_eq!(started.elapsed(), Duration::from_secs(10));

        let tx = &chain.submitted()[0];
        assert_eq!(tx.function, "OracleNetwork::submitData");
        assert_eq!(tx.arguments, vec![serde_json::json!(1), serde_json::json!(2000.0)]);
        assert_eq!(pipeline.stats().submitted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_funds_is_fatal() {
        let chain = Arc::new(InMemoryChain::new());
        chain.fail_next_submit(Error::Chain("Insufficient funds for gas".into()));
        let pipeline = pipeline(chain.clone());

        let err = pipeline.submit(42, &FeedValue::Text("x".into())).await.unwrap_err();
        assert!(matches!(err, Error::Chain(ref msg) if msg.contains("Insufficient funds")));
        assert_eq!(chain.submission_count(), 1);
        assert_eq!(pipeline.stats().failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let chain = Arc::new(InMemoryChain::new());
        chain.fail_next_submit(Error::Chain("nonce too low".into()));
        chain.fail_next_submit(Error::Chain("connection reset".into()));
        let pipeline = pipeline(chain.clone());

        let started = Instant::now();
        let response = pipeline.submit(7, &FeedValue::from(1.5)).await.unwrap();
        assert_eq!(chain.submission_count(), 3);
        assert!(response.hash.starts_with("0x"));
        // backoff 1s then 2s
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_last_error() {
        let chain = Arc::new(InMemoryChain::new());
        for _ in 0..3 {
            chain.fail_next_submit(Error::Chain("rpc unavailable".into()));
        }
        let pipeline = SubmissionPipeline::new(chain.clone(), &SubmissionConfig::default())
            .with_policy(RetryPolicy::fixed(3, Duration::from_secs(1), Duration::from_secs(60)));

        match pipeline.submit(9, &FeedValue::from(3.0)).await {
            Err(Error::SubmissionFailed {
                request_id,
                attempts,
                last_error,
            }) => {
                assert_eq!(request_id, 9);
                assert_eq!(attempts, 3);
                assert!(last_error.contains("rpc unavailable"));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(chain.submission_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_timeout_is_retried() {
        let chain = Arc::new(InMemoryChain::new());
        chain.set_never_confirm(true);
        let pipeline = SubmissionPipeline::new(chain.clone(), &SubmissionConfig::default())
            .with_policy(RetryPolicy::fixed(2, Duration::from_secs(1), Duration::from_secs(60)));

        let started = Instant::now();
        let err = pipeline.submit(5, &FeedValue::from(1.0)).await.unwrap_err();
        match err {
            Error::SubmissionFailed { last_error, .. } => {
                assert!(last_error.contains("confirmation timeout"))
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(chain.submission_count(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(300 + 1 + 300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_submit_hits_cache() {
        let chain = Arc::new(InMemoryChain::new());
        let pipeline = pipeline(chain.clone());
        let data = FeedValue::from(2000.0);

        let first = pipeline.submit(42, &data).await.unwrap();
        let second = pipeline.submit(42, &data).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(chain.submission_count(), 1);
        assert_eq!(pipeline.stats().cache_hits, 1);

        // different data is a different key
        pipeline.submit(42, &FeedValue::from(2001.0)).await.unwrap();
        assert_eq!(chain.submission_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entry_expires() {
        let chain = Arc::new(InMemoryChain::new());
        let pipeline = pipeline(chain.clone());
        let data = FeedValue::from(1.0);

        pipeline.submit(1, &data).await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        pipeline.submit(1, &data).await.unwrap();
        assert_eq!(chain.submission_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_duplicates_submit_once() {
        let chain = Arc::new(InMemoryChain::new());
        chain.set_confirmation_polls(1);
        let pipeline = Arc::new(pipeline(chain.clone()));
        let data = FeedValue::from(10.0);

        let (a, b) = tokio::join!(pipeline.submit(3, &data), pipeline.submit(3, &data));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(chain.submission_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_caller_keeps_key_serialized() {
        let chain = Arc::new(InMemoryChain::new());
        chain.set_confirmation_polls(2);
        chain.fail_next_submit(Error::Chain("rpc unavailable".into()));
        chain.fail_next_submit(Error::Chain("rpc unavailable".into()));
        let pipeline = Arc::new(
            SubmissionPipeline::new(chain.clone(), &SubmissionConfig::default())
                .with_policy(RetryPolicy::fixed(2, Duration::from_secs(1), Duration::from_secs(60))),
        );
        let data = FeedValue::from(5.0);

        let first = {
            let pipeline = pipeline.clone();
            let data = data.clone();
            tokio::spawn(async move { pipeline.submit(11, &data).await })
        };
        tokio::task::yield_now().await;
        let waiter = {
            let pipeline = pipeline.clone();
            let data = data.clone();
            tokio::spawn(async move { pipeline.submit(11, &data).await })
        };

        // first caller fails after attempts at t=0 and t=1s
        assert!(first.await.unwrap().is_err());

        // the waiter is now confirming; a late arrival must queue behind it
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(pipeline.in_flight_count(), 1);
        let late = {
            let pipeline = pipeline.clone();
            let data = data.clone();
            tokio::spawn(async move { pipeline.submit(11, &data).await })
        };

        let waited = waiter.await.unwrap().unwrap();
        let arrived = late.await.unwrap().unwrap();
        assert_eq!(waited, arrived);
        assert_eq!(chain.submission_count(), 3);
        assert_eq!(pipeline.stats().submitted, 1);
        assert_eq!(pipeline.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_listener_unsubscribes() {
        let chain = Arc::new(InMemoryChain::new());
        let pipeline = pipeline(chain.clone());

        pipeline.submit(1, &FeedValue::from(1.0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(chain.active_subscriptions(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(chain.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_gas_pass_through() {
        let chain = Arc::new(InMemoryChain::new());
        chain.set_gas_price(42);
        let pipeline = pipeline(chain);

        assert_eq!(pipeline.gas_price().await.unwrap(), 42);
        let tx = Transaction::new("f", vec![serde_json::json!(1)]);
        assert_eq!(pipeline.estimate_gas(&tx).await.unwrap(), 21_016);
    }
}
