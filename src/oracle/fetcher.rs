//! Multi-source fetcher with retries, caching and reliability tracking.
//!
//! One `fetch` call is one unit of reliability accounting: cache hits do not
//! count, a call that succeeds on any attempt counts as one success, and a
//! call that exhausts its attempts counts as one failure. Exhaustion is
//! reported as `Ok(None)` so a dead source never aborts a batch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::error::{Error, Result};
use crate::oracle::http::JsonHttpClient;
use crate::oracle::normalize::{normalize, sanitize};
use crate::oracle::sources::{DataSource, FeedValue, SourceStats};
use crate::utils::constants::*;

// ═══════════════════════════════════════════════════════════════════════════════
// FETCH OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-call fetch behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Maximum attempts per call
    pub max_retries: u32,
    /// Base delay for linear backoff (`retry_delay × attempt`)
    pub retry_delay: Duration,
    /// Serve and store values in the source cache
    pub use_cache: bool,
    /// Lifetime of a stored value
    pub cache_ttl: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_FETCH_MAX_RETRIES,
            retry_delay: DEFAULT_FETCH_RETRY_DELAY,
            use_cache: true,
            cache_ttl: DEFAULT_FETCH_CACHE_TTL,
        }
    }
}

impl FetchOptions {
    /// Options that always hit the network
    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE FETCHER
// ═══════════════════════════════════════════════════════════════════════════════

/// Registry of data sources and the fetch loop that drives them
pub struct SourceFetcher {
    sources: RwLock<Vec<Arc<DataSource>>>,
    http: Arc<dyn JsonHttpClient>,
    cache: TtlCache<String, FeedValue>,
}

impl SourceFetcher {
    /// Create an empty fetcher
    pub fn new(http: Arc<dyn JsonHttpClient>) -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            http,
            cache: TtlCache::new(DEFAULT_FETCH_CACHE_TTL),
        }
    }

    /// Register a source, replacing any source with the same name
    pub fn add_source(&self, source: DataSource) {
        let source = Arc::new(source);
        let mut sources = self.sources.write();

        match sources.iter_mut().find(|s| s.name() == source.name()) {
            Some(existing) => *existing = source,
            None => sources.push(source),
        }
    }

    /// Registered source names, in registration order
    pub fn source_names(&self) -> Vec<String> {
        self.sources.read().iter().map(|s| s.name().to_string()).collect()
    }

    /// Number of registered sources
    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    /// Check if no sources are registered
    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    fn source(&self, name: &str) -> Result<Arc<DataSource>> {
        self.sources
            .read()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| Error::UnknownSource(name.to_string()))
    }

    /// Reliability of a source, `None` before its first fetch
    pub fn source_reliability(&self, name: &str) -> Result<Option<f64>> {
        Ok(self.source(name)?.reliability())
    }

    /// Fetch counters of a source
    pub fn source_stats(&self, name: &str) -> Result<SourceStats> {
        Ok(self.source(name)?.stats())
    }

    /// Source cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop expired values from the source cache
    pub fn purge_cache(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Fetch one source.
    ///
    /// Returns `Err(UnknownSource)` for an unregistered name and `Ok(None)`
    /// when every attempt failed.
    pub async fn fetch(&self, name: &str, options: &FetchOptions) -> Result<Option<FeedValue>> {
        let source = self.source(name)?;
        let cache_key = source.cache_key();

        if options.use_cache {
            if let Some(cached) = self.cache.get(&cache_key) {
                debug!(source = name, "using cached data");
                return Ok(Some(cached));
            }
        }

        let mut last_error: Option<Error> = None;

        for attempt in 1..=options.max_retries {
            match self.attempt(&source).await {
                Ok(value) => {
                    source.record_success();
                    if options.use_cache {
                        self.cache
                            .insert_with_ttl(cache_key, value.clone(), options.cache_ttl);
                    }
                    info!(
                        source = name,
                        attempt,
                        kind = value.kind(),
                        reliability = source.reliability().unwrap_or_default(),
                        "fetched data"
                    );
                    return Ok(Some(value));
                }
                Err(e) => {
                    warn!(source = name, attempt, error = %e, "error fetching data");
                    last_error = Some(e);
                    if attempt < options.max_retries {
                        tokio::time::sleep(options.retry_delay * attempt).await;
                    }
                }
            }
        }

        source.record_failure(last_error.as_ref().map(|e| e.to_string()));
        error!(
            source = name,
            attempts = options.max_retries,
            reliability = source.reliability().unwrap_or_default(),
            "failed to fetch data after retries"
        );
        Ok(None)
    }

    async fn attempt(&self, source: &DataSource) -> Result<FeedValue> {
        let payload = self.http.get_json(source.endpoint()).await?;
        let parsed = source.parse(&payload)?;
        source.validate(&parsed)?;
        Ok(normalize(sanitize(parsed)))
    }

    /// Fetch every registered source, one at a time.
    ///
    /// Sources are independent: a failure only yields `None` for that name.
    pub async fn fetch_all(&self, options: &FetchOptions) -> BTreeMap<String, Option<FeedValue>> {
        let names = self.source_names();
        let mut results = BTreeMap::new();

        for name in names {
            let value = match self.fetch(&name, options).await {
                Ok(value) => value,
                Err(e) => {
                    error!(source = %name, error = %e, "source fetch aborted");
                    None
                }
            };
            results.insert(name, value);
        }

        results
    }
}

impl std::fmt::Debug for SourceFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFetcher")
            .field("sources", &self.source_names())
            .field("cache", &self.cache.stats())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::feeds::coingecko_price;
    use crate::oracle::schema::ValueSchema;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};

    /// Serves scripted responses per URL; an exhausted script yields an error.
    #[derive(Default)]
    struct ScriptedHttp {
        responses: Mutex<HashMap<String, VecDeque<Result<serde_json::Value>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedHttp {
        fn push(&self, url: &str, response: Result<serde_json::Value>) {
            self.responses
                .lock()
                .entry(url.to_string())
                .or_default()
                .push_back(response);
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls.lock().iter().filter(|u| u.as_str() == url).count()
        }
    }

    #[async_trait]
    impl JsonHttpClient for ScriptedHttp {
        async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
            self.calls.lock().push(url.to_string());
            self.responses
                .lock()
                .get_mut(url)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| {
                    Err(Error::Http {
                        url: url.to_string(),
                        reason: "connection refused".into(),
                    })
                })
        }
    }

    fn fetcher_with(http: Arc<ScriptedHttp>) -> SourceFetcher {
        let fetcher = SourceFetcher::new(http);
        fetcher.add_source(coingecko_price("cryptoPrice", "ethereum", "usd"));
        fetcher
    }

    fn eth_url() -> String {
        coingecko_price("cryptoPrice", "ethereum", "usd").endpoint().to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scalar_price_is_cached_unchanged() {
        let http = Arc::new(ScriptedHttp::default());
        http.push(&eth_url(), Ok(json!({"ethereum": {"usd": 2000}})));
        let fetcher = fetcher_with(Arc::clone(&http));

        let options = FetchOptions::default();
        let first = fetcher.fetch("cryptoPrice", &options).await.unwrap();
        assert_eq!(first, Some(FeedValue::Number(2000.0)));

        let second = fetcher.fetch("cryptoPrice", &options).await.unwrap();
        assert_eq!(second, Some(FeedValue::Number(2000.0)));
        assert_eq!(http.calls_to(&eth_url()), 1);

        let stats = fetcher.source_stats("cryptoPrice").unwrap();
        assert_eq!(stats.total_fetches, 1);
        assert_eq!(stats.reliability, Some(1.0));
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let fetcher = SourceFetcher::new(Arc::new(ScriptedHttp::default()));
        let err = fetcher.fetch("missing", &FetchOptions::default()).await.unwrap_err();
        assert_eq!(err, Error::UnknownSource("missing".into()));
        assert!(fetcher.source_reliability("missing").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_linear_backoff_then_succeeds() {
        let http = Arc::new(ScriptedHttp::default());
        http.push(&eth_url(), Ok(json!({"ethereum": {"usd": -5}})));
        http.push(&eth_url(), Err(Error::Http { url: eth_url(), reason: "502".into() }));
        http.push(&eth_url(), Ok(json!({"ethereum": {"usd": 1999.5}})));
        let fetcher = fetcher_with(Arc::clone(&http));

        let start = tokio::time::Instant::now();
        let value = fetcher.fetch("cryptoPrice", &FetchOptions::uncached()).await.unwrap();

        assert_eq!(value, Some(FeedValue::Number(1999.5)));
        assert_eq!(http.calls_to(&eth_url()), 3);
        // 1s after the first failure, 2s after the second
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(fetcher.source_reliability("cryptoPrice").unwrap(), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_none_and_lowers_reliability() {
        let http = Arc::new(ScriptedHttp::default());
        http.push(&eth_url(), Ok(json!({"ethereum": {"usd": 2000}})));
        let fetcher = fetcher_with(Arc::clone(&http));
        let options = FetchOptions::uncached();

        assert!(fetcher.fetch("cryptoPrice", &options).await.unwrap().is_some());
        assert_eq!(fetcher.fetch("cryptoPrice", &options).await.unwrap(), None);

        assert_eq!(http.calls_to(&eth_url()), 1 + options.max_retries as usize);
        let stats = fetcher.source_stats("cryptoPrice").unwrap();
        assert_eq!(stats.successful_fetches, 1);
        assert_eq!(stats.total_fetches, 2);
        assert_eq!(stats.reliability, Some(0.5));
        assert!(stats.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_all_isolates_failures() {
        let http = Arc::new(ScriptedHttp::default());
        http.push(&eth_url(), Ok(json!({"ethereum": {"usd": 2000}})));
        http.push("http://localhost/series", Ok(json!([1, 2, 3])));
        let fetcher = fetcher_with(Arc::clone(&http));
        fetcher.add_source(DataSource::raw("series", "http://localhost/series", ValueSchema::series(2)));
        fetcher.add_source(DataSource::raw("dead", "http://localhost/dead", ValueSchema::number()));

        let results = fetcher.fetch_all(&FetchOptions::default()).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results["cryptoPrice"], Some(FeedValue::Number(2000.0)));
        assert_eq!(results["dead"], None);

        let series = results["series"].clone().unwrap();
        let z = series.as_series().unwrap();
        assert!((z[0] + 1.224744871391589).abs() < 1e-9);
        assert_eq!(z[1], 0.0);

        assert_eq!(fetcher.source_reliability("dead").unwrap(), Some(0.0));
    }

    #[test]
    fn test_add_source_replaces_by_name() {
        let fetcher = SourceFetcher::new(Arc::new(ScriptedHttp::default()));
        fetcher.add_source(DataSource::raw("a", "http://one", ValueSchema::number()));
        fetcher.add_source(DataSource::raw("b", "http://two", ValueSchema::number()));
        fetcher.add_source(DataSource::raw("a", "http://three", ValueSchema::number()));

        assert_eq!(fetcher.source_names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(fetcher.len(), 2);
    }

    proptest::proptest! {
        #[test]
        fn prop_reliability_is_success_ratio(outcomes in proptest::collection::vec(proptest::bool::ANY, 1..40)) {
            let source = DataSource::raw("p", "http://p", ValueSchema::number());
            for ok in &outcomes {
                if *ok { source.record_success() } else { source.record_failure(None) }
            }
            let stats = source.stats();
            let expected = stats.successful_fetches as f64 / stats.total_fetches as f64;
            proptest::prop_assert_eq!(stats.total_fetches, outcomes.len() as u64);
            proptest::prop_assert_eq!(stats.reliability, Some(expected));
            let r = stats.reliability.unwrap();
            proptest::prop_assert!((0.0..=1.0).contains(&r));
        }
    }
}
