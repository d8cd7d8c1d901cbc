//! Static validation rules for source values.
//!
//! Schemas are plain Rust values declared next to each source, not a runtime
//! schema language: a value kind plus the constraints that kind supports.

use serde::{Deserialize, Serialize};

use crate::oracle::sources::FeedValue;

/// Rule for a single record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Field name
    pub name: String,
    /// Whether the field must be present
    pub required: bool,
    /// Rule for the field value
    pub schema: ValueSchema,
}

impl FieldRule {
    /// Required field
    pub fn required(name: impl Into<String>, schema: ValueSchema) -> Self {
        Self {
            name: name.into(),
            required: true,
            schema,
        }
    }

    /// Optional field, validated only when present
    pub fn optional(name: impl Into<String>, schema: ValueSchema) -> Self {
        Self {
            name: name.into(),
            required: false,
            schema,
        }
    }
}

/// Expected shape of a parsed source value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueSchema {
    /// Finite number
    Number {
        /// Must be strictly greater than zero
        positive: bool,
        /// Inclusive lower bound
        min: Option<f64>,
        /// Inclusive upper bound
        max: Option<f64>,
    },
    /// Text value
    Text {
        /// Must contain a non-whitespace character
        non_empty: bool,
    },
    /// Numeric sequence
    Series {
        /// Minimum number of readings
        min_len: usize,
    },
    /// Object with named fields
    Record {
        /// Field rules
        fields: Vec<FieldRule>,
    },
}

impl ValueSchema {
    /// Any finite number
    pub fn number() -> Self {
        ValueSchema::Number {
            positive: false,
            min: None,
            max: None,
        }
    }

    /// Finite number greater than zero
    pub fn positive_number() -> Self {
        ValueSchema::Number {
            positive: true,
            min: None,
            max: None,
        }
    }

    /// Finite number within `[min, max]`
    pub fn number_in_range(min: f64, max: f64) -> Self {
        ValueSchema::Number {
            positive: false,
            min: Some(min),
            max: Some(max),
        }
    }

    /// Any text
    pub fn text() -> Self {
        ValueSchema::Text { non_empty: false }
    }

    /// Numeric sequence with at least `min_len` readings
    pub fn series(min_len: usize) -> Self {
        ValueSchema::Series { min_len }
    }

    /// Record with the given field rules
    pub fn record(fields: Vec<FieldRule>) -> Self {
        ValueSchema::Record { fields }
    }

    /// Validate a value, returning a human-readable reason on mismatch
    pub fn validate(&self, value: &FeedValue) -> Result<(), String> {
        self.validate_at("value", value)
    }

    fn validate_at(&self, path: &str, value: &FeedValue) -> Result<(), String> {
        match (self, value) {
            (ValueSchema::Number { positive, min, max }, FeedValue::Number(n)) => {
                if !n.is_finite() {
                    return Err(format!("\"{}\" must be a finite number", path));
                }
                if *positive && *n <= 0.0 {
                    return Err(format!("\"{}\" must be a positive number", path));
                }
                if let Some(min) = min {
                    if n < min {
                        return Err(format!("\"{}\" must be greater than or equal to {}", path, min));
                    }
                }
                if let Some(max) = max {
                    if n > max {
                        return Err(format!("\"{}\" must be less than or equal to {}", path, max));
                    }
                }
                Ok(())
            }
            (ValueSchema::Text { non_empty }, FeedValue::Text(s)) => {
                if *non_empty && s.trim().is_empty() {
                    return Err(format!("\"{}\" is not allowed to be empty", path));
                }
                Ok(())
            }
            (ValueSchema::Series { min_len }, FeedValue::Series(items)) => {
                if items.len() < *min_len {
                    return Err(format!(
                        "\"{}\" must contain at least {} items",
                        path, min_len
                    ));
                }
                if items.iter().any(|x| !x.is_finite()) {
                    return Err(format!("\"{}\" must contain only finite numbers", path));
                }
                Ok(())
            }
            (ValueSchema::Record { fields }, FeedValue::Record(map)) => {
                for rule in fields {
                    let field_path = format!("{}.{}", path, rule.name);
                    match map.get(&rule.name) {
                        Some(v) => rule.schema.validate_at(&field_path, v)?,
                        None if rule.required => {
                            return Err(format!("\"{}\" is required", field_path));
                        }
                        None => {}
                    }
                }
                Ok(())
            }
            (expected, actual) => Err(format!(
                "\"{}\" must be a {}, got {}",
                path,
                expected.kind(),
                actual.kind()
            )),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ValueSchema::Number { .. } => "number",
            ValueSchema::Text { .. } => "text",
            ValueSchema::Series { .. } => "series",
            ValueSchema::Record { .. } => "record",
        }
    }
}
