//! Shared algorithm contract and preamble helpers
//!
//! Every equipment algorithm is a synchronous pure function of its inputs:
//! a metric snapshot, merged settings, the resolved control temperature,
//! and carried state. The processor performs all I/O before and after.
//! The helpers here implement the common preamble: temperature-source
//! resolution, setpoint priority, and safety bookkeeping.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::config::LocationConfig;
use crate::control::ResetCurve;
use crate::state::EquipmentState;
use crate::types::{CommandBag, ControlSettings, Equipment, MetricSnapshot};

/// Freeze-protection trip threshold (supply or mixed air at or below).
pub const FREEZESTAT_TRIP_F: f64 = 40.0;

/// High-limit trip threshold (supply at or above).
pub const HI_LIMIT_TRIP_F: f64 = 115.0;

/// Boiler emergency shutoff (supply water above).
pub const BOILER_SHUTOFF_F: f64 = 170.0;

/// Steam bundle shutoff (bundle supply at or above).
pub const STEAM_SHUTOFF_F: f64 = 165.0;

/// Lead-lag verdict for one member, resolved by the coordinator before
/// the algorithm runs.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadAssignment {
    pub group_id: String,
    pub leader_id: String,
    pub is_lead: bool,
    pub reason: String,
}

/// Everything an algorithm may read for one tick.
#[derive(Debug)]
pub struct AlgorithmInput<'a> {
    pub equipment: &'a Equipment,
    pub location: &'a LocationConfig,
    pub metrics: &'a MetricSnapshot,
    pub settings: &'a ControlSettings,
    /// Control temperature resolved through the location's candidate list
    /// (falls back to the configured default when sensors are out).
    pub current_temp: f64,
    pub state: &'a EquipmentState,
    /// Seconds since this equipment's previous tick.
    pub dt_secs: f64,
    /// Site-local wall clock (occupancy, fan cycling).
    pub local_time: NaiveTime,
    /// Epoch seconds (lead-lag bookkeeping, runtime counters).
    pub now_epoch: i64,
    /// Present when the equipment belongs to a coordinated group.
    pub lead: Option<LeadAssignment>,
}

impl AlgorithmInput<'_> {
    /// Is this equipment the designated leader? Ungrouped equipment leads
    /// itself.
    pub fn is_lead(&self) -> bool {
        self.lead.as_ref().map(|l| l.is_lead).unwrap_or(true)
    }

    /// Outdoor temperature through the location candidate list.
    pub fn outdoor_temp(&self) -> Option<f64> {
        self.metrics
            .first_finite(&self.location.temp_sources.outdoor)
    }

    /// Supply temperature through the location candidate list (used by
    /// safety interlocks regardless of the control source).
    pub fn supply_temp(&self) -> Option<f64> {
        self.metrics.first_finite(&self.location.temp_sources.supply)
    }

    /// Mixed-air temperature through the location candidate list.
    pub fn mixed_temp(&self) -> Option<f64> {
        self.metrics.first_finite(&self.location.temp_sources.mixed)
    }

    /// Occupancy for this tick, honouring a UI override.
    pub fn is_occupied(&self) -> bool {
        if let Some(forced) = self.settings.get_bool("occupancyOverride") {
            return forced;
        }
        self.location.occupancy.is_occupied(self.local_time)
    }
}

/// A tripped safety interlock. Safety output overrides everything
/// downstream, and the trip is always observable in the command bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyTrip {
    /// Interlock kind: `freezestat`, `hi-limit`, `emergency-shutoff`,
    /// `pump-interlock`.
    pub kind: String,
    pub reason: String,
}

impl SafetyTrip {
    pub fn new(kind: &str, reason: String) -> Self {
        Self {
            kind: kind.to_string(),
            reason,
        }
    }
}

/// One algorithm tick's output: the command bag plus the replacement
/// state the processor merges back into the store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlgorithmOutput {
    pub commands: CommandBag,
    pub state: EquipmentState,
    /// Set when a safety interlock fired this tick.
    pub safety: Option<SafetyTrip>,
}

/// Where the effective setpoint came from, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointSource {
    Override,
    ResetCurve,
    Default,
}

/// Resolve the effective setpoint by priority: a UI/persisted override
/// (already merged into settings), then the OAR schedule, then the static
/// default.
pub fn resolve_setpoint(
    settings: &ControlSettings,
    curve: Option<ResetCurve>,
    outdoor_temp: Option<f64>,
    static_default: f64,
) -> (f64, SetpointSource) {
    if let Some(setpoint) = settings.temperature_setpoint() {
        return (setpoint, SetpointSource::Override);
    }
    if let (Some(curve), Some(outdoor)) = (curve, outdoor_temp) {
        return (curve.setpoint_for(outdoor), SetpointSource::ResetCurve);
    }
    (static_default, SetpointSource::Default)
}

/// Resolve the control temperature for a location, reporting the metric
/// field that satisfied the lookup (`default` when sensors are out).
pub fn resolve_control_temp(
    location: &LocationConfig,
    metrics: &MetricSnapshot,
) -> (f64, String) {
    match metrics.first_finite_named(location.temp_sources.control_candidates()) {
        Some((name, value)) => (value, name.to_string()),
        None => (location.temp_sources.fallback_f, "default".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommandValue, SettingsLayer};

    #[test]
    fn setpoint_priority_override_beats_curve() {
        let mut layer = SettingsLayer::new();
        layer.insert(
            "temperature_setpoint".to_string(),
            CommandValue::Float(68.0),
        );
        let settings =
            ControlSettings::merge(&layer, &SettingsLayer::new(), &SettingsLayer::new());
        let curve = ResetCurve::new(32.0, 155.0, 72.0, 80.0);
        let (sp, source) = resolve_setpoint(&settings, Some(curve), Some(52.0), 140.0);
        assert_eq!(sp, 68.0);
        assert_eq!(source, SetpointSource::Override);
    }

    #[test]
    fn setpoint_priority_curve_beats_default() {
        let settings = ControlSettings::default();
        let curve = ResetCurve::new(32.0, 155.0, 72.0, 80.0);
        let (sp, source) = resolve_setpoint(&settings, Some(curve), Some(52.0), 140.0);
        assert!((sp - 117.5).abs() < 1e-9);
        assert_eq!(source, SetpointSource::ResetCurve);
    }

    #[test]
    fn setpoint_falls_to_default_without_outdoor_reading() {
        let settings = ControlSettings::default();
        let curve = ResetCurve::new(32.0, 155.0, 72.0, 80.0);
        let (sp, source) = resolve_setpoint(&settings, Some(curve), None, 140.0);
        assert_eq!(sp, 140.0);
        assert_eq!(source, SetpointSource::Default);
    }

    #[test]
    fn control_temp_reports_default_when_sensors_out() {
        let location = LocationConfig::new("x", "X");
        let metrics = MetricSnapshot::new();
        let (temp, source) = resolve_control_temp(&location, &metrics);
        assert_eq!(temp, location.temp_sources.fallback_f);
        assert_eq!(source, "default");
    }

    #[test]
    fn control_temp_uses_first_present_candidate() {
        let location = LocationConfig::new("x", "X");
        let mut metrics = MetricSnapshot::new();
        metrics.set("SAT", 55.0);
        metrics.set("SupplyTemp", 57.5);
        let (temp, source) = resolve_control_temp(&location, &metrics);
        assert_eq!(temp, 57.5);
        assert_eq!(source, "SupplyTemp");
    }
}
