//! Oracle data ingestion.
//!
//! This module provides multi-source data ingestion:
//! - Source definitions with static validation schemas
//! - HTTP fetching with linear-backoff retries
//! - Sanitization and z-score normalization
//! - Per-source reliability scoring and a TTL cache
//!
//! ## Usage
//!
//! ```rust,ignore
//! use oracle_node::oracle::{feeds, FetchOptions, ReqwestJsonClient, SourceFetcher};
//!
//! let fetcher = SourceFetcher::new(Arc::new(ReqwestJsonClient::with_defaults()?));
//! fetcher.add_source(feeds::coingecko_price("cryptoPrice", "ethereum", "usd"));
//!
//! let price = fetcher.fetch("cryptoPrice", &FetchOptions::default()).await?;
//! ```

pub mod feeds;
pub mod fetcher;
pub mod http;
pub mod normalize;
pub mod schema;
pub mod sources;

pub use feeds::SourceDefinition;
pub use fetcher::{FetchOptions, SourceFetcher};
pub use http::{HttpClientConfig, JsonHttpClient, ReqwestJsonClient};
pub use schema::{FieldRule, ValueSchema};
pub use sources::{DataSource, FeedValue, SourceStats};
