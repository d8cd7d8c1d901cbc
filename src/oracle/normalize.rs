//! Sanitization and normalization of fetched values.

use crate::oracle::sources::FeedValue;

/// Trim surrounding whitespace from text and from text fields of records
pub fn sanitize(value: FeedValue) -> FeedValue {
    match value {
        FeedValue::Text(s) => FeedValue::Text(s.trim().to_string()),
        FeedValue::Record(fields) => FeedValue::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k, sanitize(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Replace a numeric series with its z-scores; other values pass through.
///
/// A series with zero spread normalizes to all zeros.
pub fn normalize(value: FeedValue) -> FeedValue {
    match value {
        FeedValue::Series(items) if !items.is_empty() => FeedValue::Series(z_scores(&items)),
        other => other,
    }
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation, `None` for an empty slice
pub fn std_deviation(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    let variance = values.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// `(x - mean) / stddev` for every reading
pub fn z_scores(values: &[f64]) -> Vec<f64> {
    let (avg, sd) = match (mean(values), std_deviation(values)) {
        (Some(avg), Some(sd)) => (avg, sd),
        _ => return Vec::new(),
    };

    if sd == 0.0 {
        return vec![0.0; values.len()];
    }

    values.iter().map(|x| (x - avg) / sd).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_scalar_is_untouched() {
        assert_eq!(normalize(FeedValue::Number(2000.0)), FeedValue::Number(2000.0));
    }

    #[test]
    fn test_series_becomes_z_scores() {
        let normalized = normalize(FeedValue::Series(vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]));
        let expected = [-1.5, -0.5, -0.5, -0.5, 0.0, 0.0, 1.0, 2.0];

        let got = normalized.as_series().unwrap();
        for (g, e) in got.iter().zip(expected.iter()) {
            assert!((g - e).abs() < 1e-12, "{} != {}", g, e);
        }
    }

    #[test]
    fn test_flat_series_normalizes_to_zero() {
        assert_eq!(
            normalize(FeedValue::Series(vec![3.0, 3.0, 3.0])),
            FeedValue::Series(vec![0.0, 0.0, 0.0])
        );
        assert_eq!(normalize(FeedValue::Series(vec![])), FeedValue::Series(vec![]));
    }

    #[test]
    fn test_sanitize_trims_text_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("city".to_string(), FeedValue::Text("  London ".into()));
        fields.insert("temp".to_string(), FeedValue::Number(11.0));

        let sanitized = sanitize(FeedValue::Record(fields));
        let FeedValue::Record(out) = sanitized else {
            panic!("expected record");
        };
        assert_eq!(out["city"], FeedValue::Text("London".into()));
        assert_eq!(out["temp"], FeedValue::Number(11.0));
        assert_eq!(sanitize(FeedValue::Text(" x\n".into())), FeedValue::Text("x".into()));
    }

    proptest! {
        #[test]
        fn prop_z_scores_have_zero_mean(raw in prop::collection::vec(-100_000i32..100_000, 2..50)) {
            let values: Vec<f64> = raw.iter().map(|&x| x as f64 / 10.0).collect();
            let z = z_scores(&values);
            prop_assert_eq!(z.len(), values.len());
            let m = mean(&z).unwrap();
            prop_assert!(m.abs() < 1e-6);
        }
    }
}
