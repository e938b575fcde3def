//! Per-equipment carried state
//!
//! The state store exclusively owns PID accumulators, hysteresis latches,
//! lead-lag bookkeeping, runtime counters, and shutdown timers. Algorithms
//! never touch the store: the processor hands them an owned
//! [`EquipmentState`] snapshot and merges the returned state back after the
//! tick, so algorithm code is pure and lock-free.

pub mod snapshot;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::control::PidState;

/// Key→value state for one equipment (or one lead-lag group, stored under
/// a `group:` prefixed key).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquipmentState {
    values: HashMap<String, serde_json::Value>,
}

impl EquipmentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(serde_json::Value::as_f64)
    }

    pub fn set_f64(&mut self, key: &str, value: f64) {
        if let Some(number) = serde_json::Number::from_f64(value) {
            self.values
                .insert(key.to_string(), serde_json::Value::Number(number));
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(serde_json::Value::as_bool)
    }

    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.values
            .insert(key.to_string(), serde_json::Value::Bool(value));
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(serde_json::Value::as_str)
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.values.insert(
            key.to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    /// PID state for a named controller (`pid.heating`, `pid.cooling`, …).
    /// Missing or corrupt entries start a fresh controller.
    pub fn pid_state(&self, controller: &str) -> PidState {
        let key = format!("pid.{controller}");
        match self.values.get(&key) {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_default(),
            None => PidState::default(),
        }
    }

    pub fn set_pid_state(&mut self, controller: &str, state: PidState) {
        let key = format!("pid.{controller}");
        match serde_json::to_value(state) {
            Ok(value) => {
                self.values.insert(key, value);
            }
            Err(e) => warn!("Failed to serialize PID state for {}: {}", controller, e),
        }
    }

    /// Typed structured entry (state machines, lead-lag groups).
    pub fn get_typed<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_typed<T: Serialize>(&mut self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.values.insert(key.to_string(), v);
            }
            Err(e) => warn!("Failed to serialize state entry {}: {}", key, e),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// In-process store of per-equipment state.
///
/// Lock discipline: every method locks, copies, and releases before
/// returning. Nothing holds the lock across an await point, and ticks only
/// interact through `snapshot` / `merge`.
#[derive(Debug, Default)]
pub struct StateStore {
    entries: Mutex<HashMap<String, EquipmentState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store (snapshot restore at startup).
    pub fn load(&self, entries: HashMap<String, EquipmentState>) {
        if let Ok(mut guard) = self.entries.lock() {
            *guard = entries;
        }
    }

    /// Owned copy of one equipment's state; fresh state if absent.
    pub fn snapshot(&self, equipment_id: &str) -> EquipmentState {
        self.entries
            .lock()
            .ok()
            .and_then(|guard| guard.get(equipment_id).cloned())
            .unwrap_or_default()
    }

    /// Replace one equipment's state with the post-tick value.
    pub fn merge(&self, equipment_id: &str, state: EquipmentState) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.insert(equipment_id.to_string(), state);
        }
    }

    /// Owned copy of everything, for snapshot persistence.
    pub fn export(&self) -> HashMap<String, EquipmentState> {
        self.entries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Store key for group-level state (lead-lag coordination).
pub fn group_key(group_id: &str) -> String {
    format!("group:{group_id}")
}
