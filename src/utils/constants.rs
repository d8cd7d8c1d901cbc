//! Node-wide default constants.
//!
//! Every value here is the default for a configurable setting in
//! [`crate::config::NodeConfig`].

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// INGESTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Attempts per source fetch
pub const DEFAULT_FETCH_MAX_RETRIES: u32 = 3;

/// Base delay for linear fetch backoff
pub const DEFAULT_FETCH_RETRY_DELAY: Duration = Duration::from_millis(1_000);

/// Lifetime of a cached source value
pub const DEFAULT_FETCH_CACHE_TTL: Duration = Duration::from_secs(300);

/// HTTP request timeout for data sources
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// User agent sent to data sources
pub const DEFAULT_USER_AGENT: &str = "oracle-node/0.1";

// ═══════════════════════════════════════════════════════════════════════════════
// VALIDATORS & CONSENSUS
// ═══════════════════════════════════════════════════════════════════════════════

/// A validator counts as active if seen within this window
pub const VALIDATOR_ACTIVITY_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Leader election period
pub const DEFAULT_ELECTION_INTERVAL: Duration = Duration::from_secs(60);

/// Validator performance refresh period
pub const DEFAULT_PERFORMANCE_INTERVAL: Duration = Duration::from_secs(300);

/// Lifetime of a consensus round in the round store
pub const DEFAULT_ROUND_TTL: Duration = Duration::from_secs(600);

/// Sweep period for expired cache entries
pub const DEFAULT_CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(120);

/// Capacity of the coordinator event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ═══════════════════════════════════════════════════════════════════════════════
// SUBMISSION
// ═══════════════════════════════════════════════════════════════════════════════

/// Attempts per on-chain submission
pub const DEFAULT_SUBMIT_MAX_ATTEMPTS: u32 = 5;

/// First backoff delay between submission attempts
pub const DEFAULT_SUBMIT_MIN_BACKOFF: Duration = Duration::from_millis(1_000);

/// Upper bound for a single submission backoff delay
pub const DEFAULT_SUBMIT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Exponential growth factor for submission backoff
pub const DEFAULT_SUBMIT_BACKOFF_FACTOR: f64 = 2.0;

/// Lifetime of an idempotency cache entry
pub const DEFAULT_SUBMISSION_CACHE_TTL: Duration = Duration::from_secs(60);

/// Receipt polling period
pub const DEFAULT_CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Overall confirmation wait window
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// How long to listen for the completion event after confirmation
pub const DEFAULT_EVENT_LISTEN_WINDOW: Duration = Duration::from_secs(60);

/// Contract entry point that records a data submission
pub const SUBMIT_DATA_FUNCTION: &str = "OracleNetwork::submitData";

/// Event emitted by the contract once a submission lands
pub const DATA_SUBMITTED_EVENT: &str = "OracleNetwork::DataSubmitted";

// ═══════════════════════════════════════════════════════════════════════════════
// NODE
// ═══════════════════════════════════════════════════════════════════════════════

/// Period of the fetch-and-propose cycle
pub const DEFAULT_PROCESSING_INTERVAL: Duration = Duration::from_secs(5 * 60);
