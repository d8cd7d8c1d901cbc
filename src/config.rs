//! Node configuration.
//!
//! Defaults come from [`crate::utils::constants`]. A configuration can be
//! loaded from a JSON file and then overlaid with `ORACLE_*` environment
//! variables.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::oracle::feeds::{default_definitions, SourceDefinition};
use crate::oracle::fetcher::FetchOptions;
use crate::oracle::http::HttpClientConfig;
use crate::utils::constants::*;

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN
// ═══════════════════════════════════════════════════════════════════════════════

/// Chain connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// Oracle contract receiving submissions
    pub oracle_contract: String,
    /// Staking manager holding the validator set
    pub staking_contract: String,
    /// RPC request timeout in milliseconds
    pub timeout_ms: u64,
    /// Event polling period in milliseconds
    pub event_poll_interval_ms: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".into(),
            oracle_contract: String::new(),
            staking_contract: String::new(),
            timeout_ms: 30_000,
            event_poll_interval_ms: 2_000,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INGESTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Data ingestion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Attempts per source fetch
    pub max_retries: u32,
    /// Base linear backoff in milliseconds
    pub retry_delay_ms: u64,
    /// Serve values from the source cache
    pub use_cache: bool,
    /// Source cache TTL in seconds
    pub cache_ttl_secs: u64,
    /// HTTP client settings
    pub http: HttpClientConfig,
    /// Registered sources
    pub sources: Vec<SourceDefinition>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_FETCH_MAX_RETRIES,
            retry_delay_ms: DEFAULT_FETCH_RETRY_DELAY.as_millis() as u64,
            use_cache: true,
            cache_ttl_secs: DEFAULT_FETCH_CACHE_TTL.as_secs(),
            http: HttpClientConfig::default(),
            sources: default_definitions(),
        }
    }
}

impl FetchConfig {
    /// Per-call options derived from this configuration
    pub fn options(&self) -> FetchOptions {
        FetchOptions {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            use_cache: self.use_cache,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSENSUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Validator coordination settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Leader election period in seconds
    pub election_interval_secs: u64,
    /// Performance refresh period in seconds
    pub performance_interval_secs: u64,
    /// Round store TTL in seconds
    pub round_ttl_secs: u64,
    /// Validator activity window in seconds
    pub activity_window_secs: u64,
    /// Cache sweep period in seconds
    pub cache_purge_interval_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            election_interval_secs: DEFAULT_ELECTION_INTERVAL.as_secs(),
            performance_interval_secs: DEFAULT_PERFORMANCE_INTERVAL.as_secs(),
            round_ttl_secs: DEFAULT_ROUND_TTL.as_secs(),
            activity_window_secs: VALIDATOR_ACTIVITY_WINDOW.as_secs(),
            cache_purge_interval_secs: DEFAULT_CACHE_PURGE_INTERVAL.as_secs(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUBMISSION
// ═══════════════════════════════════════════════════════════════════════════════

/// On-chain submission settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Attempts per submission
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    pub min_backoff_ms: u64,
    /// Backoff cap in milliseconds
    pub max_backoff_ms: u64,
    /// Exponential backoff factor
    pub backoff_factor: f64,
    /// Randomize backoff delays
    pub jitter: bool,
    /// Idempotency cache TTL in seconds
    pub cache_ttl_secs: u64,
    /// Receipt polling period in milliseconds
    pub confirmation_poll_ms: u64,
    /// Confirmation window in seconds
    pub confirmation_timeout_secs: u64,
    /// Completion event listen window in seconds
    pub event_listen_secs: u64,
    /// Contract function to call
    pub function: String,
    /// Completion event name
    pub completion_event: String,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SUBMIT_MAX_ATTEMPTS,
            min_backoff_ms: DEFAULT_SUBMIT_MIN_BACKOFF.as_millis() as u64,
            max_backoff_ms: DEFAULT_SUBMIT_MAX_BACKOFF.as_millis() as u64,
            backoff_factor: DEFAULT_SUBMIT_BACKOFF_FACTOR,
            jitter: true,
            cache_ttl_secs: DEFAULT_SUBMISSION_CACHE_TTL.as_secs(),
            confirmation_poll_ms: DEFAULT_CONFIRMATION_POLL_INTERVAL.as_millis() as u64,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT.as_secs(),
            event_listen_secs: DEFAULT_EVENT_LISTEN_WINDOW.as_secs(),
            function: SUBMIT_DATA_FUNCTION.to_string(),
            completion_event: DATA_SUBMITTED_EVENT.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE
// ═══════════════════════════════════════════════════════════════════════════════

/// Complete node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Chain connection
    pub chain: ChainConfig,
    /// Data ingestion
    pub fetch: FetchConfig,
    /// Validator coordination
    pub consensus: ConsensusConfig,
    /// On-chain submission
    pub submission: SubmissionConfig,
    /// Fetch-and-propose cycle period in seconds
    pub processing_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            fetch: FetchConfig::default(),
            consensus: ConsensusConfig::default(),
            submission: SubmissionConfig::default(),
            processing_interval_secs: DEFAULT_PROCESSING_INTERVAL.as_secs(),
        }
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl NodeConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to a JSON file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::Io(e.to_string()))?;
        }

        std::fs::write(path, content).map_err(|e| Error::Io(e.to_string()))
    }

    /// Default configuration overlaid with the environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `ORACLE_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("ORACLE_RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Ok(addr) = std::env::var("ORACLE_CONTRACT_ADDRESS") {
            self.chain.oracle_contract = addr;
        }
        if let Ok(addr) = std::env::var("ORACLE_STAKING_ADDRESS") {
            self.chain.staking_contract = addr;
        }
        if let Some(v) = env_value("ORACLE_RPC_TIMEOUT_MS") {
            self.chain.timeout_ms = v;
        }

        if let Some(v) = env_value("ORACLE_FETCH_MAX_RETRIES") {
            self.fetch.max_retries = v;
        }
        if let Some(v) = env_value("ORACLE_FETCH_RETRY_DELAY_MS") {
            self.fetch.retry_delay_ms = v;
        }
        if let Some(v) = env_value("ORACLE_FETCH_CACHE_TTL_SECS") {
            self.fetch.cache_ttl_secs = v;
        }

        if let Some(v) = env_value("ORACLE_ELECTION_INTERVAL_SECS") {
            self.consensus.election_interval_secs = v;
        }
        if let Some(v) = env_value("ORACLE_PERFORMANCE_INTERVAL_SECS") {
            self.consensus.performance_interval_secs = v;
        }
        if let Some(v) = env_value("ORACLE_ROUND_TTL_SECS") {
            self.consensus.round_ttl_secs = v;
        }

        if let Some(v) = env_value("ORACLE_SUBMIT_MAX_ATTEMPTS") {
            self.submission.max_attempts = v;
        }
        if let Some(v) = env_value("ORACLE_SUBMIT_MIN_BACKOFF_MS") {
            self.submission.min_backoff_ms = v;
        }
        if let Some(v) = env_value("ORACLE_SUBMIT_MAX_BACKOFF_MS") {
            self.submission.max_backoff_ms = v;
        }
        if let Some(v) = env_value("ORACLE_CONFIRMATION_POLL_MS") {
            self.submission.confirmation_poll_ms = v;
        }
        if let Some(v) = env_value("ORACLE_CONFIRMATION_TIMEOUT_SECS") {
            self.submission.confirmation_timeout_secs = v;
        }

        if let Some(v) = env_value("ORACLE_PROCESSING_INTERVAL_SECS") {
            self.processing_interval_secs = v;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |name: &str, reason: &str| Error::Config {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if self.chain.rpc_url.is_empty() {
            return Err(invalid("chain.rpc_url", "cannot be empty"));
        }
        if self.consensus.election_interval_secs == 0 {
            return Err(invalid("consensus.election_interval_secs", "must be greater than 0"));
        }
        if self.consensus.performance_interval_secs == 0 {
            return Err(invalid("consensus.performance_interval_secs", "must be greater than 0"));
        }
        if self.consensus.cache_purge_interval_secs == 0 {
            return Err(invalid("consensus.cache_purge_interval_secs", "must be greater than 0"));
        }
        if self.submission.max_attempts == 0 {
            return Err(invalid("submission.max_attempts", "must be greater than 0"));
        }
        if self.submission.backoff_factor < 1.0 {
            return Err(invalid("submission.backoff_factor", "must be at least 1.0"));
        }
        if self.submission.min_backoff_ms > self.submission.max_backoff_ms {
            return Err(invalid("submission.min_backoff_ms", "exceeds max_backoff_ms"));
        }
        if self.submission.confirmation_poll_ms == 0 {
            return Err(invalid("submission.confirmation_poll_ms", "must be greater than 0"));
        }
        if self.processing_interval_secs == 0 {
            return Err(invalid("processing_interval_secs", "must be greater than 0"));
        }

        let mut names: Vec<&str> = self.fetch.sources.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(invalid("fetch.sources", "source names must be unique"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = NodeConfig::default();
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.fetch.cache_ttl_secs, 300);
        assert_eq!(config.consensus.election_interval_secs, 60);
        assert_eq!(config.consensus.performance_interval_secs, 300);
        assert_eq!(config.consensus.round_ttl_secs, 600);
        assert_eq!(config.submission.max_attempts, 5);
        assert_eq!(config.submission.confirmation_timeout_secs, 300);
        assert_eq!(config.submission.cache_ttl_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fetch_options_conversion() {
        let options = FetchConfig::default().options();
        assert_eq!(options, FetchOptions::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = NodeConfig::default();
        config.chain.rpc_url.clear();
        assert!(matches!(config.validate(), Err(Error::Config { .. })));

        let mut config = NodeConfig::default();
        config.submission.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.fetch.sources.extend(default_definitions());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{"chain": {"rpc_url": "http://node:8545"}}"#).unwrap();
        assert_eq!(config.chain.rpc_url, "http://node:8545");
        assert_eq!(config.chain.timeout_ms, 30_000);
        assert_eq!(config.submission, SubmissionConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node").join("config.json");

        let mut config = NodeConfig::default();
        config.chain.oracle_contract = "0xoracle".into();
        config.save(&path).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
