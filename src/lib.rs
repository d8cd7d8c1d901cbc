//! # Oracle Node
//!
//! Off-chain core of a stake-weighted oracle network. The node pulls data
//! from external HTTP sources, has a set of staked validators agree on each
//! value by plurality vote and commits the agreed value to an on-chain oracle
//! contract.
//!
//! ## Architecture
//!
//! - **Oracle**: multi-source ingestion with schema validation, retries,
//!   normalization and per-source reliability
//! - **Consensus**: validator registry, stake-weighted leader election and
//!   consensus rounds
//! - **Submission**: idempotent on-chain submission with backoff and
//!   confirmation tracking
//! - **Chain**: the blockchain client seam, with JSON-RPC and in-memory
//!   implementations
//! - **Node**: the orchestrator running everything on timers
//!
//! ## Example
//!
//! ```rust,ignore
//! use oracle_node::prelude::*;
//!
//! let node = Arc::new(OracleNode::from_config(NodeConfig::from_env())?);
//! node.start().await?;
//!
//! let mut events = node.coordinator().subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod cache;
pub mod chain;
pub mod config;
pub mod consensus;
pub mod error;
pub mod node;
pub mod oracle;
pub mod submission;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheStats, TtlCache};
    pub use crate::chain::{ChainClient, InMemoryChain, JsonRpcChainClient, Transaction};
    pub use crate::config::NodeConfig;
    pub use crate::consensus::{
        ConsensusCoordinator, CoordinatorEvent, DataRequest, RoundId, SubmitOutcome,
        ValidatorRegistry,
    };
    pub use crate::error::{Error, ErrorClass, Result};
    pub use crate::node::OracleNode;
    pub use crate::oracle::{
        feeds, FeedValue, FetchOptions, ReqwestJsonClient, SourceFetcher, ValueSchema,
    };
    pub use crate::submission::{ChainResponse, RetryPolicy, SubmissionPipeline};
    pub use crate::utils::PeriodicTask;
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
