//! Metrics document as published by the metrics build job.
//!
//! Two shapes are accepted indefinitely:
//! - current: `{last_updated_utc, overall, per_day, available_days}`
//! - legacy: one flat view whose fields sit at the top level

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// One view of the aggregates: overall or a single day.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricsView(pub Map<String, Value>);

impl MetricsView {
    pub fn from_value(v: Value) -> Self {
        match v {
            Value::Object(map) => MetricsView(map),
            _ => MetricsView::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn n_rows(&self) -> Option<&Value> {
        self.get("n_rows").filter(|v| !v.is_null())
    }

    /// Category name -> (item -> count).
    pub fn counts(&self) -> Vec<(&str, &Map<String, Value>)> {
        self.get("counts")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_object().map(|inner| (k.as_str(), inner)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn rows(&self, key: &str) -> &[Value] {
        self.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn mapping(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get(key).and_then(Value::as_object)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsDocument {
    pub last_updated_utc: Option<String>,
    pub overall: MetricsView,
    pub per_day: BTreeMap<String, MetricsView>,
    pub available_days: Vec<String>,
}

fn timestamp_of(map: &Map<String, Value>) -> Option<String> {
    map.get("last_updated_utc")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl MetricsDocument {
    /// Accepts either document shape; anything that is not a JSON object
    /// becomes an empty document.
    pub fn normalize(raw: Value) -> Self {
        let Value::Object(mut map) = raw else {
            return MetricsDocument::default();
        };
        let last_updated_utc = timestamp_of(&map);

        if !map.get("overall").is_some_and(Value::is_object) {
            return MetricsDocument {
                last_updated_utc,
                overall: MetricsView(map),
                per_day: BTreeMap::new(),
                available_days: Vec::new(),
            };
        }

        let overall = MetricsView::from_value(map.remove("overall").unwrap_or(Value::Null));
        let per_day = match map.remove("per_day") {
            Some(Value::Object(days)) => days
                .into_iter()
                .map(|(day, view)| (day, MetricsView::from_value(view)))
                .collect(),
            _ => BTreeMap::new(),
        };
        let available_days = match map.remove("available_days") {
            Some(Value::Array(days)) => days
                .into_iter()
                .filter_map(|d| match d {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        MetricsDocument { last_updated_utc, overall, per_day, available_days }
    }

    pub fn parse(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<Value>(body).map(Self::normalize)
    }

    pub fn has_day_data(&self) -> bool {
        !self.available_days.is_empty() || !self.per_day.is_empty()
    }
}

/// SHA-256 hex of a raw document body.
pub fn fingerprint(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_legacy_shape_becomes_overall() {
        let raw = json!({"last_updated_utc": "2024-01-01T00:00:00Z", "n_rows": 5});
        let doc = MetricsDocument::normalize(raw.clone());
        assert_eq!(doc.last_updated_utc.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(Value::Object(doc.overall.0.clone()), raw);
        assert!(doc.per_day.is_empty());
        assert!(doc.available_days.is_empty());
    }

    #[test]
    fn test_current_shape_passes_through() {
        let raw = json!({
            "last_updated_utc": "2024-03-28T12:00:00+00:00",
            "overall": {"n_rows": 10},
            "per_day": {"29/03": {"n_rows": 4}, "30/03": {"n_rows": 6}},
            "available_days": ["30/03", "29/03"]
        });
        let doc = MetricsDocument::normalize(raw);
        assert_eq!(doc.overall.n_rows(), Some(&json!(10)));
        assert_eq!(doc.per_day.len(), 2);
        assert_eq!(doc.per_day["29/03"].n_rows(), Some(&json!(4)));
        assert_eq!(doc.available_days, vec!["30/03", "29/03"]);
        assert!(doc.has_day_data());
    }

    #[test]
    fn test_current_shape_defaults_absent_parts() {
        let doc = MetricsDocument::normalize(json!({"overall": {"n_rows": 1}}));
        assert!(doc.per_day.is_empty());
        assert!(doc.available_days.is_empty());
        assert_eq!(doc.last_updated_utc, None);
        assert!(!doc.has_day_data());
    }

    #[test]
    fn test_non_object_overall_is_legacy() {
        let raw = json!({"overall": 3, "n_rows": 2});
        let doc = MetricsDocument::normalize(raw.clone());
        assert_eq!(Value::Object(doc.overall.0), raw);
    }

    #[test]
    fn test_non_object_document_is_empty() {
        assert_eq!(MetricsDocument::normalize(json!([1, 2])), MetricsDocument::default());
        assert_eq!(MetricsDocument::normalize(Value::Null), MetricsDocument::default());
    }

    #[test]
    fn test_empty_timestamp_is_absent() {
        let doc = MetricsDocument::normalize(json!({"last_updated_utc": "", "n_rows": 0}));
        assert_eq!(doc.last_updated_utc, None);
        let doc = MetricsDocument::normalize(json!({"last_updated_utc": 17}));
        assert_eq!(doc.last_updated_utc, None);
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(MetricsDocument::parse("<html>").is_err());
    }

    #[test]
    fn test_counts_skips_non_objects() {
        let view = MetricsView::from_value(json!({
            "counts": {"Tipo": {"Trufado": 3}, "broken": 1}
        }));
        let counts = view.counts();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].0, "Tipo");
    }

    #[test]
    fn test_fingerprint_stable() {
        assert_eq!(fingerprint("{}"), fingerprint("{}"));
        assert_ne!(fingerprint("{}"), fingerprint("[]"));
        assert_eq!(fingerprint("").len(), 64);
    }
}
