//! Data source definitions.
//!
//! A [`DataSource`] pairs an HTTP endpoint with a parse function that pulls
//! the interesting value out of the JSON payload and a static
//! [`ValueSchema`] the value must satisfy. Each source tracks its own fetch
//! counters and reliability score.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::oracle::schema::ValueSchema;

// ═══════════════════════════════════════════════════════════════════════════════
// FEED VALUE
// ═══════════════════════════════════════════════════════════════════════════════

/// A value extracted from a data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedValue {
    /// Single numeric reading
    Number(f64),
    /// Free-form text
    Text(String),
    /// Sequence of numeric readings
    Series(Vec<f64>),
    /// Named fields
    Record(BTreeMap<String, FeedValue>),
}

impl FeedValue {
    /// Convert an arbitrary JSON value, if it has a supported shape.
    ///
    /// Arrays must be entirely numeric; `null` and booleans are rejected.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(FeedValue::Number),
            serde_json::Value::String(s) => Some(FeedValue::Text(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| v.as_f64())
                .collect::<Option<Vec<f64>>>()
                .map(FeedValue::Series),
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| Self::from_json(v).map(|fv| (k.clone(), fv)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(FeedValue::Record),
            serde_json::Value::Null | serde_json::Value::Bool(_) => None,
        }
    }

    /// Get the numeric value, if scalar
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeedValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the series, if this is one
    pub fn as_series(&self) -> Option<&[f64]> {
        match self {
            FeedValue::Series(s) => Some(s),
            _ => None,
        }
    }

    /// Short kind name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            FeedValue::Number(_) => "number",
            FeedValue::Text(_) => "text",
            FeedValue::Series(_) => "series",
            FeedValue::Record(_) => "record",
        }
    }

    /// Canonical JSON encoding, used as on-chain payload
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("null"))
    }
}

impl From<f64> for FeedValue {
    fn from(n: f64) -> Self {
        FeedValue::Number(n)
    }
}

impl fmt::Display for FeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedValue::Number(n) => write!(f, "{}", n),
            FeedValue::Text(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE STATISTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Fetch counters for one source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    /// Fetch calls that produced a value
    pub successful_fetches: u64,
    /// Fetch calls that reached the network
    pub total_fetches: u64,
    /// `successful / total`, undefined before the first fetch
    pub reliability: Option<f64>,
    /// Time of the last successful fetch
    pub last_success_at: Option<DateTime<Utc>>,
    /// Last attempt error message
    pub last_error: Option<String>,
}

impl SourceStats {
    fn recompute(&mut self) {
        self.reliability = if self.total_fetches == 0 {
            None
        } else {
            Some(self.successful_fetches as f64 / self.total_fetches as f64)
        };
    }

    fn record_success(&mut self) {
        self.successful_fetches += 1;
        self.total_fetches += 1;
        self.last_success_at = Some(Utc::now());
        self.last_error = None;
        self.recompute();
    }

    fn record_failure(&mut self, error: Option<String>) {
        self.total_fetches += 1;
        self.last_error = error;
        self.recompute();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DATA SOURCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Extracts the value of interest from a raw JSON payload
pub type ParseFn =
    Arc<dyn Fn(&serde_json::Value) -> std::result::Result<FeedValue, String> + Send + Sync>;

/// A registered external data source
pub struct DataSource {
    name: String,
    endpoint: String,
    schema: ValueSchema,
    parser: ParseFn,
    stats: Mutex<SourceStats>,
}

impl DataSource {
    /// Create a new data source
    pub fn new<F>(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        schema: ValueSchema,
        parser: F,
    ) -> Self
    where
        F: Fn(&serde_json::Value) -> std::result::Result<FeedValue, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            schema,
            parser: Arc::new(parser),
            stats: Mutex::new(SourceStats::default()),
        }
    }

    /// Source whose payload is taken as-is
    pub fn raw(name: impl Into<String>, endpoint: impl Into<String>, schema: ValueSchema) -> Self {
        Self::new(name, endpoint, schema, |payload| {
            FeedValue::from_json(payload).ok_or_else(|| "unsupported payload shape".to_string())
        })
    }

    /// Source name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// HTTP endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Validation schema
    pub fn schema(&self) -> &ValueSchema {
        &self.schema
    }

    /// Key under which fetched values are cached
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.name, self.endpoint)
    }

    /// Apply the parse function
    pub fn parse(&self, payload: &serde_json::Value) -> Result<FeedValue> {
        (self.parser)(payload).map_err(|reason| Error::Parse {
            source_name: self.name.clone(),
            reason,
        })
    }

    /// Check a parsed value against the schema
    pub fn validate(&self, value: &FeedValue) -> Result<()> {
        self.schema
            .validate(value)
            .map_err(|reason| Error::SchemaValidation {
                source_name: self.name.clone(),
                reason,
            })
    }

    /// Snapshot of fetch counters
    pub fn stats(&self) -> SourceStats {
        self.stats.lock().clone()
    }

    /// Reliability score, `None` before the first fetch
    pub fn reliability(&self) -> Option<f64> {
        self.stats.lock().reliability
    }

    pub(crate) fn record_success(&self) {
        self.stats.lock().record_success();
    }

    pub(crate) fn record_failure(&self, error: Option<String>) {
        self.stats.lock().record_failure(error);
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("schema", &self.schema)
            .field("stats", &*self.stats.lock())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feed_value_from_json() {
        assert_eq!(FeedValue::from_json(&json!(2000)), Some(FeedValue::Number(2000.0)));
        assert_eq!(
            FeedValue::from_json(&json!([1, 2.5])),
            Some(FeedValue::Series(vec![1.0, 2.5]))
        );
        assert_eq!(FeedValue::from_json(&json!([1, "a"])), None);
        assert_eq!(FeedValue::from_json(&json!(null)), None);

        let record = FeedValue::from_json(&json!({"city": "London", "temp": 12.5})).unwrap();
        assert_eq!(record.kind(), "record");
    }

    #[test]
    fn test_reliability_undefined_until_first_fetch() {
        let source = DataSource::raw("s", "http://localhost/s", ValueSchema::number());
        assert_eq!(source.reliability(), None);

        source.record_success();
        source.record_failure(Some("timeout".into()));
        source.record_failure(None);
        source.record_success();

        let stats = source.stats();
        assert_eq!(stats.successful_fetches, 2);
        assert_eq!(stats.total_fetches, 4);
        assert_eq!(stats.reliability, Some(0.5));
    }

    #[test]
    fn test_parse_error_names_source() {
        let source = DataSource::new("weather", "http://localhost/w", ValueSchema::number(), |p| {
            p.get("temp")
                .and_then(|t| t.as_f64())
                .map(FeedValue::Number)
                .ok_or_else(|| "missing temp".to_string())
        });

        let err = source.parse(&json!({})).unwrap_err();
        assert_eq!(
            err,
            Error::Parse {
                source_name: "weather".into(),
                reason: "missing temp".into()
            }
        );
        assert_eq!(source.parse(&json!({"temp": 3})).unwrap(), FeedValue::Number(3.0));
    }

    #[test]
    fn test_value_serializes_untagged() {
        assert_eq!(FeedValue::Number(2000.0).to_json_string(), "2000.0");
        assert_eq!(FeedValue::Text("x".into()).to_json_string(), "\"x\"");
    }
}
