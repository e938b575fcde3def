//! Fan coil control
//!
//! Dead-band heating/cooling around the zone setpoint with one PID per
//! valve, per-location outdoor damper behaviour, and freeze/high-limit
//! interlocks.

use tracing::debug;

use super::common::{
    resolve_setpoint, AlgorithmInput, AlgorithmOutput, SafetyTrip, FREEZESTAT_TRIP_F,
    HI_LIMIT_TRIP_F,
};
use super::Algorithm;
use crate::control::{pid_run, PidParams, PidState};
use crate::types::{CommandBag, CommandType};

/// No control action inside this band around the setpoint.
const DEAD_BAND_F: f64 = 1.0;

/// Widened band during unoccupied hours (setback).
const UNOCCUPIED_DEAD_BAND_F: f64 = 4.0;

fn cooling_params() -> PidParams {
    PidParams {
        kp: 3.5,
        ki: 0.2,
        kd: 0.02,
        output_min: 0.0,
        output_max: 100.0,
        reverse_acting: false,
        max_integral: 15.0,
        enabled: true,
    }
}

fn heating_params() -> PidParams {
    PidParams {
        kp: 3.5,
        ki: 0.2,
        kd: 0.02,
        output_min: 0.0,
        output_max: 100.0,
        reverse_acting: true,
        max_integral: 15.0,
        enabled: true,
    }
}

/// Valve position → fan speed step.
fn fan_speed_for(valve_position: f64) -> &'static str {
    if valve_position > 66.0 {
        "high"
    } else if valve_position > 33.0 {
        "medium"
    } else {
        "low"
    }
}

/// Base fan-coil algorithm. Damper behaviour comes from the location's
/// configured strategy, so one implementation serves every site.
pub struct FanCoil;

impl Algorithm for FanCoil {
    fn name(&self) -> &str {
        "fan-coil/base"
    }

    fn evaluate(&self, input: &AlgorithmInput) -> AlgorithmOutput {
        let mut state = input.state.clone();
        let mut commands = CommandBag::new();

        let (setpoint, _) =
            resolve_setpoint(input.settings, None, None, input.location.default_setpoint_f);
        let outdoor = input.outdoor_temp();
        let supply = input.supply_temp();
        let occupied = input.is_occupied();

        // Safety interlocks run before anything else and override
        // everything downstream.
        if let Some(supply) = supply {
            if supply <= FREEZESTAT_TRIP_F {
                let trip = SafetyTrip::new(
                    "freezestat",
                    format!("supply {supply:.1}F at or below {FREEZESTAT_TRIP_F:.0}F"),
                );
                commands
                    .set(CommandType::HeatingValvePosition, 100.0)
                    .set(CommandType::CoolingValvePosition, 0.0)
                    .set(CommandType::FanEnabled, false)
                    .set(CommandType::FanSpeed, "off")
                    .set(CommandType::OutdoorDamperPosition, 0.0)
                    .set(CommandType::UnitEnable, false)
                    .set(CommandType::OperationMode, "freeze-protect")
                    .set(CommandType::TemperatureSetpoint, setpoint);
                state.set_pid_state("heating", PidState::default());
                state.set_pid_state("cooling", PidState::default());
                return AlgorithmOutput {
                    commands,
                    state,
                    safety: Some(trip),
                };
            }
            if supply >= HI_LIMIT_TRIP_F {
                let trip = SafetyTrip::new(
                    "hi-limit",
                    format!("supply {supply:.1}F at or above {HI_LIMIT_TRIP_F:.0}F"),
                );
                commands
                    .set(CommandType::HeatingValvePosition, 0.0)
                    .set(CommandType::CoolingValvePosition, 0.0)
                    .set(CommandType::OutdoorDamperPosition, 100.0)
                    .set(CommandType::FanEnabled, true)
                    .set(CommandType::FanSpeed, "high")
                    .set(CommandType::UnitEnable, true)
                    .set(CommandType::OperationMode, "hi-limit")
                    .set(CommandType::TemperatureSetpoint, setpoint);
                state.set_pid_state("heating", PidState::default());
                state.set_pid_state("cooling", PidState::default());
                return AlgorithmOutput {
                    commands,
                    state,
                    safety: Some(trip),
                };
            }
        }

        // Operator force-off wins over the control loops.
        if input.settings.unit_enable_override() == Some(false) {
            commands
                .set(CommandType::UnitEnable, false)
                .set(CommandType::FanEnabled, false)
                .set(CommandType::FanSpeed, "off")
                .set(CommandType::HeatingValvePosition, 0.0)
                .set(CommandType::CoolingValvePosition, 0.0)
                .set(CommandType::OutdoorDamperPosition, 0.0)
                .set(CommandType::OperationMode, "off")
                .set(CommandType::TemperatureSetpoint, setpoint);
            state.set_pid_state("heating", PidState::default());
            state.set_pid_state("cooling", PidState::default());
            return AlgorithmOutput {
                commands,
                state,
                ..Default::default()
            };
        }

        let dead_band = if occupied {
            DEAD_BAND_F
        } else {
            UNOCCUPIED_DEAD_BAND_F
        };
        let error = input.current_temp - setpoint;

        let mut heating = 0.0;
        let mut cooling = 0.0;
        if error > dead_band {
            let out = pid_run(
                input.current_temp,
                setpoint,
                &cooling_params(),
                input.dt_secs,
                &state.pid_state("cooling"),
            );
            cooling = out.output;
            state.set_pid_state("cooling", out.state);
            state.set_pid_state("heating", PidState::default());
        } else if error < -dead_band {
            let out = pid_run(
                input.current_temp,
                setpoint,
                &heating_params(),
                input.dt_secs,
                &state.pid_state("heating"),
            );
            heating = out.output;
            state.set_pid_state("heating", out.state);
            state.set_pid_state("cooling", PidState::default());
        } else {
            state.set_pid_state("heating", PidState::default());
            state.set_pid_state("cooling", PidState::default());
        }

        let calling = heating > 0.0 || cooling > 0.0;
        // Unoccupied: the fan only runs when a valve is open.
        let fan_enabled = occupied || calling;
        let fan_speed = if !fan_enabled {
            "off"
        } else {
            fan_speed_for(heating.max(cooling))
        };

        // Damper follows the location strategy, closed when the fan is off.
        let damper = match outdoor {
            Some(oat) if fan_enabled => input.location.damper.position_for(oat),
            _ => 0.0,
        };

        let mode = if cooling > 0.0 {
            "cooling"
        } else if heating > 0.0 {
            "heating"
        } else {
            "satisfied"
        };
        debug!(
            equipment_id = %input.equipment.id,
            mode,
            temp = input.current_temp,
            setpoint,
            "Fan coil tick"
        );

        commands
            .set(CommandType::HeatingValvePosition, heating)
            .set(CommandType::CoolingValvePosition, cooling)
            .set(CommandType::FanEnabled, fan_enabled)
            .set(CommandType::FanSpeed, fan_speed)
            .set(CommandType::OutdoorDamperPosition, damper)
            .set(CommandType::UnitEnable, fan_enabled)
            .set(CommandType::OperationMode, mode)
            .set(CommandType::TemperatureSetpoint, setpoint);

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
    use crate::state::EquipmentState;
    use crate::types::{
        CommandValue, ControlSettings, Equipment, EquipmentType, MetricSnapshot, SettingsLayer,
    };
    use chrono::NaiveTime;

    fn make_input<'a>(
        equipment: &'a Equipment,
        location: &'a LocationConfig,
        metrics: &'a MetricSnapshot,
        settings: &'a ControlSettings,
        state: &'a EquipmentState,
        current_temp: f64,
    ) -> AlgorithmInput<'a> {
        AlgorithmInput {
            equipment,
            location,
            metrics,
            settings,
            current_temp,
            state,
            dt_secs: 1.0,
            local_time: NaiveTime::from_hms_opt(10, 0, 0).expect("time"),
            now_epoch: 1_700_000_000,
            lead: None,
        }
    }

    fn setpoint_settings(setpoint: f64) -> ControlSettings {
        let mut ui = SettingsLayer::new();
        ui.insert(
            "temperature_setpoint".to_string(),
            CommandValue::Float(setpoint),
        );
        ControlSettings::merge(&ui, &SettingsLayer::new(), &SettingsLayer::new())
    }

    #[test]
    fn cooling_call_drives_cooling_valve() {
        let equipment = Equipment::new("fc-1", EquipmentType::FanCoil, "heritage");
        let location = LocationConfig::new("heritage", "Heritage");
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 77.0);
        metrics.set("OutdoorAirTemp", 85.0);
        let settings = setpoint_settings(72.0);
        let state = EquipmentState::new();
        let input = make_input(&equipment, &location, &metrics, &settings, &state, 77.0);

        let out = FanCoil.evaluate(&input);
        // P = 3.5·5, I = 0.5 (rate-limited first increment), D = 0.02·5.
        let cooling = out
            .commands
            .get_f64(CommandType::CoolingValvePosition)
            .expect("cooling");
        assert!((cooling - 18.1).abs() < 1e-9);
        assert_eq!(
            out.commands.get_f64(CommandType::HeatingValvePosition),
            Some(0.0)
        );
        assert_eq!(out.commands.get_bool(CommandType::FanEnabled), Some(true));
        assert!(out.safety.is_none());
    }

    #[test]
    fn heating_call_drives_heating_valve() {
        let equipment = Equipment::new("fc-1", EquipmentType::FanCoil, "heritage");
        let location = LocationConfig::new("heritage", "Heritage");
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 66.0);
        let settings = setpoint_settings(72.0);
        let state = EquipmentState::new();
        let input = make_input(&equipment, &location, &metrics, &settings, &state, 66.0);

        let out = FanCoil.evaluate(&input);
        assert!(out.commands.get_f64(CommandType::HeatingValvePosition).expect("heating") > 0.0);
        assert_eq!(
            out.commands.get_f64(CommandType::CoolingValvePosition),
            Some(0.0)
        );
    }

    #[test]
    fn dead_band_closes_both_valves() {
        let equipment = Equipment::new("fc-1", EquipmentType::FanCoil, "heritage");
        let location = LocationConfig::new("heritage", "Heritage");
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 72.5);
        let settings = setpoint_settings(72.0);
        let state = EquipmentState::new();
        let input = make_input(&equipment, &location, &metrics, &settings, &state, 72.5);

        let out = FanCoil.evaluate(&input);
        assert_eq!(
            out.commands.get_f64(CommandType::HeatingValvePosition),
            Some(0.0)
        );
        assert_eq!(
            out.commands.get_f64(CommandType::CoolingValvePosition),
            Some(0.0)
        );
        assert_eq!(out.commands.get_str(CommandType::OperationMode), Some("satisfied"));
    }

    #[test]
    fn freezestat_trips_at_exactly_forty() {
        let equipment = Equipment::new("fc-1", EquipmentType::FanCoil, "heritage");
        let location = LocationConfig::new("heritage", "Heritage");
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 40.0);
        let settings = setpoint_settings(72.0);
        let state = EquipmentState::new();
        let input = make_input(&equipment, &location, &metrics, &settings, &state, 40.0);

        let out = FanCoil.evaluate(&input);
        let trip = out.safety.expect("freezestat trip");
        assert_eq!(trip.kind, "freezestat");
        assert_eq!(
            out.commands.get_f64(CommandType::HeatingValvePosition),
            Some(100.0)
        );
        assert_eq!(out.commands.get_bool(CommandType::FanEnabled), Some(false));
        assert_eq!(
            out.commands.get_f64(CommandType::OutdoorDamperPosition),
            Some(0.0)
        );
    }

    #[test]
    fn freezestat_does_not_trip_just_above_forty() {
        let equipment = Equipment::new("fc-1", EquipmentType::FanCoil, "heritage");
        let location = LocationConfig::new("heritage", "Heritage");
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 40.01);
        let settings = setpoint_settings(72.0);
        let state = EquipmentState::new();
        let input = make_input(&equipment, &location, &metrics, &settings, &state, 40.01);

        let out = FanCoil.evaluate(&input);
        assert!(out.safety.is_none());
    }

    #[test]
    fn hi_limit_opens_damper_and_closes_heat() {
        let equipment = Equipment::new("fc-1", EquipmentType::FanCoil, "heritage");
        let location = LocationConfig::new("heritage", "Heritage");
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 116.0);
        let settings = setpoint_settings(72.0);
        let state = EquipmentState::new();
        let input = make_input(&equipment, &location, &metrics, &settings, &state, 116.0);

        let out = FanCoil.evaluate(&input);
        let trip = out.safety.expect("hi-limit trip");
        assert_eq!(trip.kind, "hi-limit");
        assert_eq!(
            out.commands.get_f64(CommandType::HeatingValvePosition),
            Some(0.0)
        );
        assert_eq!(
            out.commands.get_f64(CommandType::OutdoorDamperPosition),
            Some(100.0)
        );
    }

    #[test]
    fn identical_inputs_produce_identical_outputs() {
        let equipment = Equipment::new("fc-1", EquipmentType::FanCoil, "heritage");
        let location = LocationConfig::new("heritage", "Heritage");
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 77.0);
        let settings = setpoint_settings(72.0);
        let state = EquipmentState::new();
        let input = make_input(&equipment, &location, &metrics, &settings, &state, 77.0);

        let a = FanCoil.evaluate(&input);
        let b = FanCoil.evaluate(&input);
        assert_eq!(a.commands, b.commands);
        assert_eq!(a.state, b.state);
    }
}
