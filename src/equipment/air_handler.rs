//! Air handler control (base variant)
//!
//! Supply-air setpoint from the location's reset schedule, dead-band
//! heating/cooling PIDs, economizer damper, electric-heat staging, and
//! unoccupied fan cycling where the location configures it.

use tracing::debug;

use super::common::{
    resolve_setpoint, AlgorithmInput, AlgorithmOutput, SafetyTrip, FREEZESTAT_TRIP_F,
    HI_LIMIT_TRIP_F,
};
use super::Algorithm;
use crate::control::{fan_cycle_active, pid_run, PidParams, PidState};
use crate::types::{CommandBag, CommandType};

/// Supply-air setpoint when no schedule or override applies.
const DEFAULT_SAT_F: f64 = 65.0;

/// No valve action inside this band around the supply setpoint.
const DEAD_BAND_F: f64 = 1.0;

/// Electric heat stage 1 engages at this heating-valve demand.
const STAGE1_DEMAND: f64 = 50.0;

/// Stage 2 engages at this demand.
const STAGE2_DEMAND: f64 = 85.0;

fn valve_params(reverse_acting: bool) -> PidParams {
    PidParams {
        kp: 4.0,
        ki: 0.15,
        kd: 0.05,
        output_min: 0.0,
        output_max: 100.0,
        reverse_acting,
        max_integral: 15.0,
        enabled: true,
    }
}

fn fan_speed_for(valve_position: f64) -> &'static str {
    if valve_position > 66.0 {
        "high"
    } else if valve_position > 33.0 {
        "medium"
    } else {
        "low"
    }
}

/// Base air handler. Location-specific subsystem machinery (chilled-water
/// plants, DX staging) lives in dispatcher variants.
pub struct AirHandler;

impl Algorithm for AirHandler {
    fn name(&self) -> &str {
        "air-handler/base"
    }

    fn evaluate(&self, input: &AlgorithmInput) -> AlgorithmOutput {
        let mut state = input.state.clone();
        let mut commands = CommandBag::new();

        let outdoor = input.outdoor_temp();
        let supply = input.supply_temp();
        let mixed = input.mixed_temp();
        let occupied = input.is_occupied();
        let curve = input.location.reset_curve("air-handler");
        let (setpoint, _) = resolve_setpoint(input.settings, curve, outdoor, DEFAULT_SAT_F);

        commands
            .set(CommandType::SupplyAirTempSetpoint, setpoint)
            .set(CommandType::IsOccupied, occupied);

        // Freezestat watches both supply and mixed air.
        let freeze_input = match (supply, mixed) {
            (Some(s), Some(m)) => Some(s.min(m)),
            (Some(s), None) => Some(s),
            (None, Some(m)) => Some(m),
            (None, None) => None,
        };
        if let Some(cold) = freeze_input {
            if cold <= FREEZESTAT_TRIP_F {
                let trip = SafetyTrip::new(
                    "freezestat",
                    format!("air {cold:.1}F at or below {FREEZESTAT_TRIP_F:.0}F"),
                );
                commands
                    .set(CommandType::HeatingValvePosition, 100.0)
                    .set(CommandType::CoolingValvePosition, 0.0)
                    .set(CommandType::FanEnabled, false)
                    .set(CommandType::FanSpeed, "off")
                    .set(CommandType::OutdoorDamperPosition, 0.0)
                    .set(CommandType::UnitEnable, false)
                    .set(CommandType::HeatingStage1Command, false)
                    .set(CommandType::HeatingStage2Command, false);
                state.set_pid_state("heating", PidState::default());
                state.set_pid_state("cooling", PidState::default());
                return AlgorithmOutput {
                    commands,
                    state,
                    safety: Some(trip),
                };
            }
        }
        if let Some(supply) = supply {
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
                    .set(CommandType::HeatingStage1Command, false)
                    .set(CommandType::HeatingStage2Command, false);
                state.set_pid_state("heating", PidState::default());
                state.set_pid_state("cooling", PidState::default());
                return AlgorithmOutput {
                    commands,
                    state,
                    safety: Some(trip),
                };
            }
        }

        if input.settings.unit_enable_override() == Some(false) {
            commands
                .set(CommandType::HeatingValvePosition, 0.0)
                .set(CommandType::CoolingValvePosition, 0.0)
                .set(CommandType::FanEnabled, false)
                .set(CommandType::FanSpeed, "off")
                .set(CommandType::OutdoorDamperPosition, 0.0)
                .set(CommandType::UnitEnable, false)
                .set(CommandType::HeatingStage1Command, false)
                .set(CommandType::HeatingStage2Command, false);
            state.set_pid_state("heating", PidState::default());
            state.set_pid_state("cooling", PidState::default());
            return AlgorithmOutput {
                commands,
                state,
                ..Default::default()
            };
        }

        // Fan: occupied hours run continuously; unoccupied hours cycle
        // when the location configures it, otherwise rest.
        let fan_enabled = if occupied {
            true
        } else {
            match input.location.fan_cycle_run_minutes {
                Some(run_minutes) => fan_cycle_active(input.local_time, run_minutes),
                None => false,
            }
        };

        // Valves track the supply setpoint only while air is moving.
        let control_temp = supply.unwrap_or(input.current_temp);
        let error = control_temp - setpoint;
        let mut heating = 0.0;
        let mut cooling = 0.0;
        if fan_enabled && error > DEAD_BAND_F {
            let out = pid_run(
                control_temp,
                setpoint,
                &valve_params(false),
                input.dt_secs,
                &state.pid_state("cooling"),
            );
            cooling = out.output;
            state.set_pid_state("cooling", out.state);
            state.set_pid_state("heating", PidState::default());
        } else if fan_enabled && error < -DEAD_BAND_F {
            let out = pid_run(
                control_temp,
                setpoint,
                &valve_params(true),
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

        // Electric heat staging follows the heating valve demand; stages
        // never run with the fan off.
        let stage1 = fan_enabled && heating >= STAGE1_DEMAND;
        let stage2 = fan_enabled && heating >= STAGE2_DEMAND;

        let damper = match outdoor {
            Some(oat) if fan_enabled && occupied => input.location.damper.position_for(oat),
            _ => 0.0,
        };

        debug!(
            equipment_id = %input.equipment.id,
            occupied,
            fan_enabled,
            heating,
            cooling,
            "Air handler tick"
        );

        commands
            .set(CommandType::HeatingValvePosition, heating)
            .set(CommandType::CoolingValvePosition, cooling)
            .set(CommandType::FanEnabled, fan_enabled)
            .set(
                CommandType::FanSpeed,
                if fan_enabled {
                    fan_speed_for(heating.max(cooling))
                } else {
                    "off"
                },
            )
            .set(CommandType::OutdoorDamperPosition, damper)
            .set(CommandType::UnitEnable, fan_enabled)
            .set(CommandType::HeatingStage1Command, stage1)
            .set(CommandType::HeatingStage2Command, stage2);

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
    use crate::types::{ControlSettings, Equipment, EquipmentType, MetricSnapshot};
    use chrono::NaiveTime;

    fn warren() -> LocationConfig {
        let mut location = LocationConfig::new("warren", "Warren");
        location.fan_cycle_run_minutes = Some(15);
        location
    }

    fn evaluate(
        location: &LocationConfig,
        metrics: &MetricSnapshot,
        local_time: NaiveTime,
    ) -> AlgorithmOutput {
        let equipment = Equipment::new("ahu-1", EquipmentType::AirHandler, "warren");
        let settings = ControlSettings::default();
        let state = EquipmentState::new();
        let input = AlgorithmInput {
            equipment: &equipment,
            location,
            metrics,
            settings: &settings,
            current_temp: metrics.get_f64("SupplyTemp").unwrap_or(65.0),
            state: &state,
            dt_secs: 30.0,
            local_time,
            now_epoch: 1_700_000_000,
            lead: None,
        };
        AirHandler.evaluate(&input)
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("time")
    }

    #[test]
    fn occupied_hours_run_the_fan() {
        let location = warren();
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 65.0);
        metrics.set("OutdoorAirTemp", 60.0);
        let out = evaluate(&location, &metrics, t(10, 0));
        assert_eq!(out.commands.get_bool(CommandType::FanEnabled), Some(true));
        assert_eq!(out.commands.get_bool(CommandType::IsOccupied), Some(true));
    }

    #[test]
    fn unoccupied_fan_cycles_first_quarter_hour() {
        let location = warren();
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 65.0);
        // 23:10 local: unoccupied, inside the run window.
        let out = evaluate(&location, &metrics, t(23, 10));
        assert_eq!(out.commands.get_bool(CommandType::FanEnabled), Some(true));
        // 23:40 local: unoccupied, resting.
        let out = evaluate(&location, &metrics, t(23, 40));
        assert_eq!(out.commands.get_bool(CommandType::FanEnabled), Some(false));
        assert_eq!(out.commands.get_bool(CommandType::IsOccupied), Some(false));
    }

    #[test]
    fn hot_supply_drives_cooling_valve() {
        let location = warren();
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 75.0);
        metrics.set("OutdoorAirTemp", 85.0);
        let out = evaluate(&location, &metrics, t(10, 0));
        assert!(out.commands.get_f64(CommandType::CoolingValvePosition).expect("cooling") > 0.0);
        assert_eq!(out.commands.get_f64(CommandType::HeatingValvePosition), Some(0.0));
    }

    #[test]
    fn deep_heating_demand_stages_electric_heat() {
        let location = warren();
        let mut metrics = MetricSnapshot::new();
        // Far below setpoint: the heating PID saturates.
        metrics.set("SupplyTemp", 42.0);
        metrics.set("OutdoorAirTemp", 20.0);
        let out = evaluate(&location, &metrics, t(10, 0));
        let heating = out.commands.get_f64(CommandType::HeatingValvePosition).expect("heating");
        assert!(heating >= STAGE2_DEMAND);
        assert_eq!(out.commands.get_bool(CommandType::HeatingStage1Command), Some(true));
        assert_eq!(out.commands.get_bool(CommandType::HeatingStage2Command), Some(true));
    }

    #[test]
    fn freezestat_watches_mixed_air() {
        let location = warren();
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 58.0);
        metrics.set("MixedAirTemp", 39.0);
        let out = evaluate(&location, &metrics, t(10, 0));
        let trip = out.safety.expect("freezestat");
        assert_eq!(trip.kind, "freezestat");
        assert_eq!(out.commands.get_f64(CommandType::HeatingValvePosition), Some(100.0));
        assert_eq!(out.commands.get_bool(CommandType::FanEnabled), Some(false));
    }

    #[test]
    fn damper_closed_when_unoccupied() {
        let location = warren();
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 65.0);
        metrics.set("OutdoorAirTemp", 60.0);
        let out = evaluate(&location, &metrics, t(23, 5));
        assert_eq!(out.commands.get_f64(CommandType::OutdoorDamperPosition), Some(0.0));
    }
}
