//! Built-in data feeds.
//!
//! Each feed deserializes its provider's response into a typed struct and
//! extracts a single reading from it:
//! - CoinGecko simple price (`{asset: {currency: price}}`)
//! - OpenWeather current conditions (`main.temp`)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::oracle::schema::ValueSchema;
use crate::oracle::sources::{DataSource, FeedValue};

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER RESPONSE TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// CoinGecko `/simple/price` response
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct CoinGeckoSimplePrice(pub HashMap<String, HashMap<String, f64>>);

impl CoinGeckoSimplePrice {
    /// Price of `asset` quoted in `currency`
    pub fn price(&self, asset: &str, currency: &str) -> Option<f64> {
        self.0.get(asset).and_then(|quotes| quotes.get(currency)).copied()
    }
}

/// OpenWeather `/weather` response
#[derive(Debug, Deserialize)]
pub struct OpenWeatherResponse {
    /// Main readings
    pub main: OpenWeatherMain,
    /// City name
    #[serde(default)]
    pub name: Option<String>,
}

/// Main block of an OpenWeather response
#[derive(Debug, Deserialize)]
pub struct OpenWeatherMain {
    /// Temperature
    pub temp: f64,
    /// Relative humidity in percent
    #[serde(default)]
    pub humidity: Option<f64>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEED CONSTRUCTORS
// ═══════════════════════════════════════════════════════════════════════════════

/// CoinGecko spot price for one asset, validated as a positive number
pub fn coingecko_price(name: &str, asset: &str, currency: &str) -> DataSource {
    let endpoint = format!(
        "https://api.coingecko.com/api/v3/simple/price?ids={}&vs_currencies={}",
        asset, currency
    );
    let asset = asset.to_string();
    let currency = currency.to_string();

    DataSource::new(name, endpoint, ValueSchema::positive_number(), move |payload| {
        let response: CoinGeckoSimplePrice =
            serde_json::from_value(payload.clone()).map_err(|e| e.to_string())?;
        response
            .price(&asset, &currency)
            .map(FeedValue::Number)
            .ok_or_else(|| format!("\"{}.{}\" is required", asset, currency))
    })
}

/// OpenWeather current temperature for a city
pub fn openweather_temperature(name: &str, city: &str, api_key: &str) -> DataSource {
    let endpoint = format!(
        "https://api.openweathermap.org/data/2.5/weather?q={}&appid={}",
        city, api_key
    );

    DataSource::new(name, endpoint, ValueSchema::number(), |payload| {
        let response: OpenWeatherResponse =
            serde_json::from_value(payload.clone()).map_err(|e| e.to_string())?;
        Ok(FeedValue::Number(response.main.temp))
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURABLE DEFINITIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Serializable description of a source, as found in node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDefinition {
    /// CoinGecko simple price
    CoinGecko {
        /// Source name
        name: String,
        /// CoinGecko asset id (e.g. "ethereum")
        asset: String,
        /// Quote currency (e.g. "usd")
        currency: String,
    },
    /// OpenWeather temperature
    OpenWeather {
        /// Source name
        name: String,
        /// City query
        city: String,
        /// API key
        api_key: String,
    },
    /// Arbitrary JSON endpoint whose whole body is the value
    Json {
        /// Source name
        name: String,
        /// Endpoint URL
        url: String,
        /// Value schema
        schema: ValueSchema,
    },
}

impl SourceDefinition {
    /// Source name
    pub fn name(&self) -> &str {
        match self {
            SourceDefinition::CoinGecko { name, .. }
            | SourceDefinition::OpenWeather { name, .. }
            | SourceDefinition::Json { name, .. } => name,
        }
    }

    /// Build the runtime source
    pub fn build(&self) -> DataSource {
        match self {
            SourceDefinition::CoinGecko { name, asset, currency } => {
                coingecko_price(name, asset, currency)
            }
            SourceDefinition::OpenWeather { name, city, api_key } => {
                openweather_temperature(name, city, api_key)
            }
            SourceDefinition::Json { name, url, schema } => {
                DataSource::raw(name.as_str(), url.as_str(), schema.clone())
            }
        }
    }
}

/// Sources registered when the configuration names none
pub fn default_definitions() -> Vec<SourceDefinition> {
    vec![SourceDefinition::CoinGecko {
        name: "cryptoPrice".into(),
        asset: "ethereum".into(),
        currency: "usd".into(),
    }]
}
