//! Oracle node orchestration.
//!
//! Wires ingestion, consensus and submission together:
//!
//! 1. Load the validator registry from the chain (fatal on failure)
//! 2. Elect a leader and start the election and performance timers
//! 3. Every processing interval, fetch all sources and open one consensus
//!    round per value
//! 4. Submit every finalized value on-chain

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStats;
use crate::chain::{Address, ChainClient, JsonRpcChainClient};
use crate::config::NodeConfig;
use crate::consensus::{ConsensusCoordinator, CoordinatorEvent, DataRequest, RoundId};
use crate::error::Result;
use crate::oracle::{FeedValue, JsonHttpClient, ReqwestJsonClient, SourceFetcher};
use crate::submission::{PipelineStats, SubmissionPipeline};
use crate::utils::PeriodicTask;

/// Node-wide counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Registered data sources
    pub sources: usize,
    /// Known validators
    pub validators: usize,
    /// Rounds in the round store
    pub rounds: usize,
    /// Current leader
    pub leader: Option<Address>,
    /// Election attempts
    pub election_round: u64,
    /// Last request id handed out
    pub last_request_id: u64,
    /// Source cache counters
    pub source_cache: CacheStats,
    /// Submission counters
    pub submissions: PipelineStats,
}

/// A running oracle node
pub struct OracleNode {
    config: NodeConfig,
    chain: Arc<dyn ChainClient>,
    fetcher: Arc<SourceFetcher>,
    coordinator: Arc<ConsensusCoordinator>,
    pipeline: Arc<SubmissionPipeline>,
    next_request_id: AtomicU64,
    running: AtomicBool,
    tasks: Mutex<Vec<PeriodicTask>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl OracleNode {
    /// Assemble a node over the given chain and HTTP clients
    pub fn new(
        config: NodeConfig,
        chain: Arc<dyn ChainClient>,
        http: Arc<dyn JsonHttpClient>,
    ) -> Self {
        let fetcher = Arc::new(SourceFetcher::new(http));
        for definition in &config.fetch.sources {
            fetcher.add_source(definition.build());
        }

        let coordinator = Arc::new(ConsensusCoordinator::new(config.consensus.clone()));
        let pipeline = Arc::new(SubmissionPipeline::new(chain.clone(), &config.submission));

        Self {
            config,
            chain,
            fetcher,
            coordinator,
            pipeline,
            next_request_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
        }
    }

    /// Assemble a node talking to the configured JSON-RPC endpoint
    pub fn from_config(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let chain = Arc::new(JsonRpcChainClient::new(&config.chain)?);
        let http = Arc::new(ReqwestJsonClient::new(&config.fetch.http)?);
        Ok(Self::new(config, chain, http))
    }

    /// Effective configuration
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Chain client
    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    /// Source fetcher
    pub fn fetcher(&self) -> &Arc<SourceFetcher> {
        &self.fetcher
    }

    /// Consensus coordinator
    pub fn coordinator(&self) -> &Arc<ConsensusCoordinator> {
        &self.coordinator
    }

    /// Submission pipeline
    pub fn pipeline(&self) -> &Arc<SubmissionPipeline> {
        &self.pipeline
    }

    /// Snapshot of node counters
    pub fn stats(&self) -> NodeStats {
        let elector = self.coordinator.elector();
        NodeStats {
            sources: self.fetcher.len(),
            validators: self.coordinator.registry().len(),
            rounds: self.coordinator.round_count(),
            leader: elector.current_leader(),
            election_round: elector.election_round(),
            last_request_id: self.next_request_id.load(Ordering::SeqCst).saturating_sub(1),
            source_cache: self.fetcher.cache_stats(),
            submissions: self.pipeline.stats(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Load validators, start background work and run the first cycle.
    ///
    /// A second call while the node is running is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Oracle node already running");
            return Ok(());
        }

        let started = self.start_tasks().await;
        if started.is_err() {
            self.stop().await;
        }
        started
    }

    async fn start_tasks(self: &Arc<Self>) -> Result<()> {
        self.config.validate()?;

        info!("Starting oracle node");
        let validators = self.coordinator.load_validators(self.chain.as_ref()).await?;
        if validators == 0 {
            warn!("Validator set is empty, rounds cannot be opened until it is not");
        }

        self.coordinator.elector().elect();
        self.coordinator.start()?;
        self.spawn_submitter();

        self.process_cycle().await;

        let weak = Arc::downgrade(self);
        let processing = PeriodicTask::spawn(
            "data-processing",
            Duration::from_secs(self.config.processing_interval_secs),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(node) = weak.upgrade() {
                        node.process_cycle().await;
                    }
                }
            },
        )?;

        let weak = Arc::downgrade(self);
        let purge = PeriodicTask::spawn(
            "cache-purge",
            Duration::from_secs(self.config.consensus.cache_purge_interval_secs),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(node) = weak.upgrade() {
                        node.purge_caches();
                    }
                }
            },
        )?;

        let mut tasks = self.tasks.lock();
        tasks.push(processing);
        tasks.push(purge);

        info!(
            validators,
            sources = self.fetcher.len(),
            interval_secs = self.config.processing_interval_secs,
            "Oracle node started"
        );
        Ok(())
    }

    /// Whether `start` has been called without a matching `stop`
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop every background task
    pub async fn stop(&self) {
        let tasks: Vec<PeriodicTask> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.stop().await;
        }
        self.coordinator.stop().await;

        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Oracle node stopped");
    }

    /// Fetch every source and open a round per available value.
    ///
    /// Sources without data this cycle are skipped.
    pub async fn process_cycle(&self) -> Vec<RoundId> {
        let options = self.config.fetch.options();
        let results = self.fetcher.fetch_all(&options).await;

        let mut rounds = Vec::new();
        for (source, value) in results {
            let Some(payload) = value else {
                debug!(source = %source, "No data this cycle");
                continue;
            };

            let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
            let request = DataRequest {
                request_id,
                source: source.clone(),
                payload,
            };

            match self.coordinator.create_round(request) {
                Ok(round_id) => rounds.push(round_id),
                Err(e) => warn!(source = %source, request_id, error = %e, "Could not open round"),
            }
        }

        info!(rounds = rounds.len(), "Processing cycle complete");
        rounds
    }

    /// Submit data on-chain on behalf of a registered validator.
    ///
    /// The attempt counts against the validator up front and is credited once
    /// the pipeline confirms it. Chain failures are logged and reported as
    /// `Ok(false)`.
    pub async fn submit_validator_data(
        &self,
        validator: &str,
        request_id: u64,
        data: &FeedValue,
    ) -> Result<bool> {
        let registry = self.coordinator.registry();
        registry.record_submission(validator)?;

        match self.pipeline.submit(request_id, data).await {
            Ok(response) => {
                registry.record_success(validator)?;
                info!(
                    validator = %validator,
                    request_id,
                    hash = %response.hash,
                    "Validator data submitted"
                );
                Ok(true)
            }
            Err(e) => {
                error!(validator = %validator, request_id, error = %e, "Validator data submission failed");
                Ok(false)
            }
        }
    }

    fn purge_caches(&self) {
        let rounds = self.coordinator.purge_expired_rounds();
        let values = self.fetcher.purge_cache();
        let submissions = self.pipeline.purge_cache();
        debug!(rounds, values, submissions, "Expired cache entries purged");
    }

    /// Submit every finalized value through the pipeline
    fn spawn_submitter(&self) {
        let mut events = self.coordinator.subscribe();
        let pipeline = self.pipeline.clone();

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CoordinatorEvent::ConsensusReached {
                        round_id,
                        request_id,
                        value,
                    }) => {
                        let pipeline = pipeline.clone();
                        tokio::spawn(async move {
                            if let Err(e) = pipeline.submit(request_id, &value).await {
                                error!(
                                    round_id = %round_id,
                                    request_id,
                                    error = %e,
                                    "Failed to submit consensus value"
                                );
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Submitter lagged behind coordinator events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self.listener.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl std::fmt::Debug for OracleNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleNode")
            .field("rpc_url", &self.config.chain.rpc_url)
            .field("fetcher", &self.fetcher)
            .field("pipeline", &self.pipeline)
            .field("running", &self.is_running())
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

impl Drop for OracleNode {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}
