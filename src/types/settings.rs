//! Merged control settings
//!
//! An algorithm never sees the three raw sources (UI command store,
//! persisted last commands, computed defaults); it sees one
//! [`ControlSettings`] snapshot merged by explicit priority in a single
//! step:
//!
//! 1. UI overrides (snake_case field names) — highest
//! 2. Persisted last-known commands (camelCase) — medium
//! 3. Algorithm-computed defaults — lowest

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::command::CommandValue;

/// One source of settings, keyed by raw field name.
pub type SettingsLayer = BTreeMap<String, CommandValue>;

/// Convert a snake_case UI field name to the canonical camelCase key.
/// camelCase input passes through unchanged.
pub fn canonical_key(raw: &str) -> String {
    if !raw.contains('_') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut upper_next = false;
    for c in raw.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// The merged configuration presented to an algorithm for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Flat merged view, canonical camelCase keys.
    values: BTreeMap<String, CommandValue>,
    /// Which keys came from the UI layer (these are operator intent and
    /// win every per-key conflict).
    ui_keys: Vec<String>,
    /// `customLogicEnabled` as the UI command store reports it.
    pub custom_logic_enabled_ui: Option<bool>,
    /// `customLogicEnabled` as the persisted settings cache reports it.
    pub custom_logic_enabled_cached: Option<bool>,
}

impl ControlSettings {
    /// Merge the three snapshots. UI keys are canonicalised from
    /// snake_case; persisted and default keys are already camelCase.
    pub fn merge(ui: &SettingsLayer, persisted: &SettingsLayer, defaults: &SettingsLayer) -> Self {
        let mut values: BTreeMap<String, CommandValue> = BTreeMap::new();

        for (k, v) in defaults {
            values.insert(canonical_key(k), v.clone());
        }
        for (k, v) in persisted {
            values.insert(canonical_key(k), v.clone());
        }
        let mut ui_keys = Vec::with_capacity(ui.len());
        for (k, v) in ui {
            let key = canonical_key(k);
            ui_keys.push(key.clone());
            values.insert(key, v.clone());
        }

        let custom_ui = ui
            .get("custom_logic_enabled")
            .or_else(|| ui.get("customLogicEnabled"))
            .and_then(CommandValue::as_bool);
        let custom_cached = persisted
            .get("customLogicEnabled")
            .and_then(CommandValue::as_bool);

        Self {
            values,
            ui_keys,
            custom_logic_enabled_ui: custom_ui,
            custom_logic_enabled_cached: custom_cached,
        }
    }

    /// Build from a single defaults layer (tests, degraded ticks).
    pub fn from_defaults(defaults: &SettingsLayer) -> Self {
        Self::merge(&SettingsLayer::new(), &SettingsLayer::new(), defaults)
    }

    pub fn get(&self, key: &str) -> Option<&CommandValue> {
        self.values.get(&canonical_key(key))
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(CommandValue::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(CommandValue::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(CommandValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// True when the value for `key` was supplied by the UI layer.
    pub fn is_ui_override(&self, key: &str) -> bool {
        let canonical = canonical_key(key);
        self.ui_keys.iter().any(|k| *k == canonical)
    }

    /// Effective `customLogicEnabled`.
    ///
    /// The two sources are known to disagree occasionally; the UI command
    /// store wins when both are present because it carries the fresher
    /// operator intent. Absent both, custom logic defaults to enabled.
    pub fn custom_logic_enabled(&self) -> bool {
        self.custom_logic_enabled_ui
            .or(self.custom_logic_enabled_cached)
            .unwrap_or(true)
    }

    /// Temperature setpoint override, if any layer carries one.
    pub fn temperature_setpoint(&self) -> Option<f64> {
        self.get_f64("temperatureSetpoint")
            .filter(|v| v.is_finite())
    }

    /// Operator force-disable: `unitEnable=false` from the UI wins over
    /// everything except safety trips (which also disable).
    pub fn unit_enable_override(&self) -> Option<bool> {
        if self.is_ui_override("unitEnable") {
            self.get_bool("unitEnable")
        } else {
            None
        }
    }

    /// Manual lag-run override for standby lead-lag members.
    pub fn manual_lag_override(&self) -> bool {
        self.get_bool("manualLagOverride").unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
