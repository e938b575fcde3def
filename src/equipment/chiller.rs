//! Chiller control
//!
//! Outdoor-temperature lockout, alarm gating, and chilled-water setpoint
//! tracking with a 1.5°F dead-band. Dual-chiller locations rotate weekly
//! through the lead-lag coordinator; the lag machine stays off.

use tracing::debug;

use super::common::{AlgorithmInput, AlgorithmOutput};
use super::Algorithm;
use crate::coordination::MemberHealth;
use crate::types::{CommandBag, CommandType, Equipment, MetricSnapshot};

/// Chilled-water setpoint when no override applies.
const DEFAULT_CHW_SETPOINT_F: f64 = 44.0;

/// Enable once the chilled-water temperature exceeds setpoint by this much.
const ENABLE_DEAD_BAND_F: f64 = 1.5;

/// Ordered candidates for the chilled-water temperature.
const CHW_CANDIDATES: [&str; 3] = ["ChilledWaterTemp", "CHWSupplyTemp", "ChwSupply"];

/// Ordered candidates for alarm flags.
const ALARM_CANDIDATES: [&str; 3] = ["ChillerAlarm", "Alarm", "ChillerFault"];

fn chilled_water_temp(metrics: &MetricSnapshot) -> Option<f64> {
    CHW_CANDIDATES
        .iter()
        .filter_map(|name| metrics.get_f64(name))
        .find(|v| v.is_finite())
}

fn alarm_active(metrics: &MetricSnapshot) -> bool {
    ALARM_CANDIDATES
        .iter()
        .filter_map(|name| metrics.fields.get(*name))
        .filter_map(|v| v.as_bool())
        .next()
        .unwrap_or(false)
}

/// Health input for dual-chiller lead-lag: an alarmed machine cannot lead.
pub fn chiller_health(equipment: &Equipment, metrics: &MetricSnapshot) -> MemberHealth {
    if alarm_active(metrics) {
        MemberHealth::failed(&equipment.id, "alarm active")
    } else {
        MemberHealth::healthy(&equipment.id)
    }
}

/// Base chiller algorithm.
pub struct Chiller;

impl Algorithm for Chiller {
    fn name(&self) -> &str {
        "chiller/base"
    }

    fn evaluate(&self, input: &AlgorithmInput) -> AlgorithmOutput {
        let mut state = input.state.clone();
        let mut commands = CommandBag::new();

        let setpoint = input
            .settings
            .get_f64("waterTempSetpoint")
            .filter(|v| v.is_finite())
            .unwrap_or(DEFAULT_CHW_SETPOINT_F);
        commands.set(CommandType::WaterTempSetpoint, setpoint);

        let outdoor = input.outdoor_temp();
        let chw = chilled_water_temp(input.metrics);

        // Lockout boundary is inclusive: at exactly the lockout
        // temperature the chiller disables.
        let locked_out = match outdoor {
            Some(oat) => oat <= input.location.chiller_lockout_f,
            None => true,
        };
        let alarmed = alarm_active(input.metrics);
        let standby = !input.is_lead();
        let forced_off = input.settings.unit_enable_override() == Some(false);

        let enabled = if locked_out || alarmed || standby || forced_off {
            false
        } else {
            match chw {
                // Water-temp control: demand-driven with a dead-band
                // latch (on above setpoint + band, off at setpoint).
                Some(chw) => {
                    let was_enabled = state.get_bool("enabled").unwrap_or(false);
                    if chw > setpoint + ENABLE_DEAD_BAND_F {
                        true
                    } else if chw <= setpoint {
                        false
                    } else {
                        was_enabled
                    }
                }
                // No water-temp control: run whenever conditions permit.
                None => true,
            }
        };
        state.set_bool("enabled", enabled);

        debug!(
            equipment_id = %input.equipment.id,
            enabled,
            locked_out,
            alarmed,
            "Chiller tick"
        );

        commands.set(CommandType::UnitEnable, enabled);

        AlgorithmOutput {
            commands,
            state,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocationConfig;
    use crate::equipment::common::LeadAssignment;
    use crate::state::EquipmentState;
    use crate::types::{ControlSettings, EquipmentType};
    use chrono::NaiveTime;

    struct Harness {
        equipment: Equipment,
        location: LocationConfig,
        settings: ControlSettings,
        state: EquipmentState,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                equipment: Equipment::new("ch-1", EquipmentType::Chiller, "hopebridge"),
                location: LocationConfig::new("hopebridge", "Hopebridge"),
                settings: ControlSettings::default(),
                state: EquipmentState::new(),
            }
        }

        fn tick(&mut self, metrics: &MetricSnapshot, lead: Option<LeadAssignment>) -> AlgorithmOutput {
            let input = AlgorithmInput {
                equipment: &self.equipment,
                location: &self.location,
                metrics,
                settings: &self.settings,
                current_temp: 0.0,
                state: &self.state,
                dt_secs: 300.0,
                local_time: NaiveTime::from_hms_opt(13, 0, 0).expect("time"),
                now_epoch: 1_700_000_000,
                lead,
            };
            let out = Chiller.evaluate(&input);
            self.state = out.state.clone();
            out
        }
    }

    fn metrics(outdoor: f64, chw: f64) -> MetricSnapshot {
        let mut m = MetricSnapshot::new();
        m.set("OutdoorAirTemp", outdoor);
        m.set("ChilledWaterTemp", chw);
        m
    }

    #[test]
    fn enables_on_demand_above_dead_band() {
        let mut harness = Harness::new();
        // 46F chw > 44 + 1.5.
        let out = harness.tick(&metrics(70.0, 46.0), None);
        assert_eq!(out.commands.get_bool(CommandType::UnitEnable), Some(true));
        assert_eq!(out.commands.get_f64(CommandType::WaterTempSetpoint), Some(44.0));
    }

    #[test]
    fn lockout_at_exactly_the_threshold_disables() {
        let mut harness = Harness::new();
        let out = harness.tick(&metrics(50.0, 50.0), None);
        assert_eq!(out.commands.get_bool(CommandType::UnitEnable), Some(false));
        // Just above the lockout it may run.
        let out = harness.tick(&metrics(50.1, 50.0), None);
        assert_eq!(out.commands.get_bool(CommandType::UnitEnable), Some(true));
    }

    #[test]
    fn alarm_blocks_enable() {
        let mut harness = Harness::new();
        let mut m = metrics(70.0, 50.0);
        m.set("ChillerAlarm", true);
        let out = harness.tick(&m, None);
        assert_eq!(out.commands.get_bool(CommandType::UnitEnable), Some(false));
    }

    #[test]
    fn demand_latch_holds_between_setpoint_and_band() {
        let mut harness = Harness::new();
        harness.tick(&metrics(70.0, 46.0), None); // engaged
        // 45F is inside (44, 45.5]: latch holds.
        let out = harness.tick(&metrics(70.0, 45.0), None);
        assert_eq!(out.commands.get_bool(CommandType::UnitEnable), Some(true));
        // At setpoint: release.
        let out = harness.tick(&metrics(70.0, 44.0), None);
        assert_eq!(out.commands.get_bool(CommandType::UnitEnable), Some(false));
    }

    #[test]
    fn no_water_temp_control_runs_when_permitted() {
        let mut harness = Harness::new();
        let mut m = MetricSnapshot::new();
        m.set("OutdoorAirTemp", 70.0);
        let out = harness.tick(&m, None);
        assert_eq!(out.commands.get_bool(CommandType::UnitEnable), Some(true));
    }

    #[test]
    fn standby_machine_stays_off() {
        let mut harness = Harness::new();
        let lead = LeadAssignment {
            group_id: "hopebridge-chillers".to_string(),
            leader_id: "ch-2".to_string(),
            is_lead: false,
            reason: "normal".to_string(),
        };
        let out = harness.tick(&metrics(70.0, 50.0), Some(lead));
        assert_eq!(out.commands.get_bool(CommandType::UnitEnable), Some(false));
    }

    #[test]
    fn command_bag_is_within_allowed_set() {
        let mut harness = Harness::new();
        let mut out = harness.tick(&metrics(70.0, 46.0), None);
        let removed = out.commands.retain_allowed(EquipmentType::Chiller);
        assert_eq!(removed, 0);
    }
}
