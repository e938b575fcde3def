//! Metric snapshot types
//!
//! The engine never consumes raw time series; each tick works from a
//! latest-within-window snapshot where every field carries its most recent
//! non-null value.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single telemetry field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Float(f64),
    Bool(bool),
    Text(String),
}

impl MetricValue {
    /// Numeric view of the value. Booleans map to 1.0/0.0; strings parse
    /// if they look numeric, otherwise `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Float(v) => Some(*v),
            MetricValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            MetricValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            MetricValue::Float(v) => Some(*v != 0.0),
            MetricValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "on" | "1" | "yes" => Some(true),
                "false" | "off" | "0" | "no" => Some(false),
                _ => None,
            },
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

/// Latest-known telemetry for one equipment at one instant.
///
/// Field names are whatever the site's sensors report; semantic resolution
/// (supply temp, outdoor temp, amps) goes through ordered candidate lists
/// via [`MetricSnapshot::first_finite`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Field name → latest non-null value.
    pub fields: HashMap<String, MetricValue>,
    /// Epoch nanoseconds of the newest sample that contributed a field.
    #[serde(default)]
    pub observed_at_ns: Option<i64>,
}

impl MetricSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field.
    pub fn set(&mut self, name: &str, value: impl Into<MetricValue>) {
        self.fields.insert(name.to_string(), value.into());
    }

    /// Exact-name numeric lookup.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(MetricValue::as_f64)
    }

    /// Exact-name string lookup.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(MetricValue::as_str)
    }

    /// Resolve a semantic input: first candidate present with a finite
    /// numeric value wins. Returns `None` when the whole list is exhausted;
    /// callers then fall back to the configured type default.
    pub fn first_finite(&self, candidates: &[String]) -> Option<f64> {
        candidates
            .iter()
            .filter_map(|name| self.get_f64(name))
            .find(|v| v.is_finite())
    }

    /// Like [`first_finite`](Self::first_finite) but also reports which
    /// candidate satisfied the lookup, for `temperatureSource` reporting.
    pub fn first_finite_named<'a>(&self, candidates: &'a [String]) -> Option<(&'a str, f64)> {
        for name in candidates {
            if let Some(v) = self.get_f64(name) {
                if v.is_finite() {
                    return Some((name.as_str(), v));
                }
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn first_finite_respects_order() {
        let mut snap = MetricSnapshot::new();
        snap.set("SupplyTemp", 141.2);
        snap.set("supplyTemperature", 99.0);
        let cands = candidates(&["supplyTemperature", "SupplyTemp"]);
        assert_eq!(snap.first_finite(&cands), Some(99.0));
    }

    #[test]
    fn first_finite_skips_nan_and_missing() {
        let mut snap = MetricSnapshot::new();
        snap.set("A", f64::NAN);
        snap.set("C", 55.5);
        let cands = candidates(&["A", "B", "C"]);
        assert_eq!(snap.first_finite(&cands), Some(55.5));
        assert_eq!(
            snap.first_finite_named(&cands).map(|(n, v)| (n, v)),
            Some(("C", 55.5))
        );
    }

    #[test]
    fn exhausted_candidates_yield_none() {
        let snap = MetricSnapshot::new();
        assert_eq!(snap.first_finite(&candidates(&["X", "Y"])), None);
    }

    #[test]
    fn value_coercions() {
        assert_eq!(MetricValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(MetricValue::Text("37.5".into()).as_f64(), Some(37.5));
        assert_eq!(MetricValue::Text("off".into()).as_bool(), Some(false));
        assert_eq!(MetricValue::Float(0.0).as_bool(), Some(false));
        assert_eq!(MetricValue::Text("fault".into()).as_f64(), None);
    }
}
