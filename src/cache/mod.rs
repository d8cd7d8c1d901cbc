//! In-memory caches shared by ingestion, consensus and submission.
//!
//! - Source fetch cache (default TTL 300s)
//! - Consensus round store (default TTL 600s)
//! - Submission idempotency cache (default TTL 60s)

pub mod ttl;

pub use ttl::{CacheStats, TtlCache};
