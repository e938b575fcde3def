//! Hopebridge air handlers
//!
//! AHU-1 serves the chilled-water plant: its cooling side sequences the
//! circulation pump and chiller through a warmup/cooldown state machine so
//! the chiller never starts against dead water. AHU-2 carries a DX stage
//! with wide hysteresis and a minimum runtime. Both are selected by the
//! equipment subrole.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::common::{
    resolve_setpoint, AlgorithmInput, AlgorithmOutput, SafetyTrip, FREEZESTAT_TRIP_F,
    HI_LIMIT_TRIP_F,
};
use super::Algorithm;
use crate::control::{pid_run, PidParams, PidState};
use crate::types::{CommandBag, CommandType};

/// Supply-air setpoint when no schedule or override applies.
const DEFAULT_SAT_F: f64 = 55.0;

/// Cooling conditions require outdoor air above this.
const COOLING_OAT_MIN_F: f64 = 55.0;

/// Cooling conditions require mixed and supply air above this
/// (freeze-adjacent water must not reach the chiller barrel).
const COOLING_AIR_MIN_F: f64 = 38.0;

/// Pump lead time before the chiller may start.
const PUMP_WARMUP_SECS: f64 = 120.0;

/// Pump run-on after the chiller stops.
const PUMP_COOLDOWN_SECS: f64 = 300.0;

/// Total DX hysteresis around the setpoint.
const DX_HYSTERESIS_F: f64 = 7.5;

/// DX minimum runtime once engaged.
const DX_MIN_RUN_SECS: f64 = 900.0;

/// Fan amp candidates for proof-of-flow.
const FAN_AMP_CANDIDATES: [&str; 3] = ["FanAmps", "SupplyFanAmps", "SFAmps"];

/// Chilled-water cooling sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum CoolingStage {
    #[default]
    Idle,
    PumpWarmup,
    CoolingActive,
    PumpCooldown,
}

fn cooling_params() -> PidParams {
    PidParams {
        kp: 4.0,
        ki: 0.15,
        kd: 0.05,
        output_min: 0.0,
        output_max: 100.0,
        reverse_acting: false,
        max_integral: 15.0,
        enabled: true,
    }
}

fn heating_params() -> PidParams {
    PidParams {
        reverse_acting: true,
        ..cooling_params()
    }
}

fn fan_running(input: &AlgorithmInput, fan_commanded: bool) -> bool {
    for name in FAN_AMP_CANDIDATES {
        if let Some(amps) = input.metrics.get_f64(name) {
            if amps.is_finite() {
                return amps > 0.5;
            }
        }
    }
    fan_commanded
}

/// Both Hopebridge air handlers, dispatched on subrole.
pub struct HopebridgeAirHandler;

impl Algorithm for HopebridgeAirHandler {
    fn name(&self) -> &str {
        "air-handler/hopebridge"
    }

    fn evaluate(&self, input: &AlgorithmInput) -> AlgorithmOutput {
        match input.equipment.subrole.as_deref() {
            Some("2") => evaluate_dx(input),
            _ => evaluate_chilled_water(input),
        }
    }
}

/// Shared safety preamble; returns a completed bag when an interlock trips.
fn safety_check(input: &AlgorithmInput, commands: &mut CommandBag) -> Option<SafetyTrip> {
    let supply = input.supply_temp();
    let mixed = input.mixed_temp();
    let cold = match (supply, mixed) {
        (Some(s), Some(m)) => Some(s.min(m)),
        (Some(s), None) => Some(s),
        (None, Some(m)) => Some(m),
        (None, None) => None,
    };
    if let Some(cold) = cold {
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
                .set(CommandType::CwCircPumpEnabled, false)
                .set(CommandType::ChillerEnabled, false)
                .set(CommandType::DxEnabled, false);
            return Some(trip);
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
                .set(CommandType::CwCircPumpEnabled, false)
                .set(CommandType::ChillerEnabled, false)
                .set(CommandType::DxEnabled, false);
            return Some(trip);
        }
    }
    None
}

/// AHU-1: chilled-water coil fed by a dedicated circulation pump and
/// chiller, sequenced `idle → pump-warmup → cooling-active →
/// pump-cooldown → idle`.
fn evaluate_chilled_water(input: &AlgorithmInput) -> AlgorithmOutput {
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

    if let Some(trip) = safety_check(input, &mut commands) {
        state.set_typed("cooling_stage", &CoolingStage::Idle);
        state.set_f64("warmup_secs", 0.0);
        state.set_f64("cooldown_secs", 0.0);
        state.set_pid_state("cooling", PidState::default());
        state.set_pid_state("heating", PidState::default());
        return AlgorithmOutput {
            commands,
            state,
            safety: Some(trip),
        };
    }

    let fan_commanded =
        occupied && input.settings.unit_enable_override() != Some(false);
    let proof_of_flow = fan_running(input, fan_commanded);

    // Cooling conditions per the plant sequence: warm enough outside,
    // no freeze-adjacent air, and air actually moving.
    let conditions = outdoor.map(|o| o > COOLING_OAT_MIN_F).unwrap_or(false)
        && mixed.map(|m| m > COOLING_AIR_MIN_F).unwrap_or(false)
        && supply.map(|s| s > COOLING_AIR_MIN_F).unwrap_or(false)
        && proof_of_flow;

    let mut stage: CoolingStage = state.get_typed("cooling_stage").unwrap_or_default();
    let mut warmup_secs = state.get_f64("warmup_secs").unwrap_or(0.0);
    let mut cooldown_secs = state.get_f64("cooldown_secs").unwrap_or(0.0);

    let mut pump_on = false;
    let mut chiller_on = false;
    let mut cooling_valve = 0.0;

    match stage {
        CoolingStage::Idle => {
            if conditions {
                info!(equipment_id = %input.equipment.id, "Cooling sequence: pump warmup");
                stage = CoolingStage::PumpWarmup;
                warmup_secs = 0.0;
                pump_on = true;
            }
        }
        CoolingStage::PumpWarmup => {
            if !conditions {
                stage = CoolingStage::PumpCooldown;
                cooldown_secs = PUMP_COOLDOWN_SECS;
                pump_on = true;
            } else if warmup_secs >= PUMP_WARMUP_SECS {
                info!(equipment_id = %input.equipment.id, "Cooling sequence: active");
                stage = CoolingStage::CoolingActive;
                pump_on = true;
                chiller_on = true;
            } else {
                pump_on = true;
            }
        }
        CoolingStage::CoolingActive => {
            if !conditions {
                info!(equipment_id = %input.equipment.id, "Cooling sequence: pump cooldown");
                stage = CoolingStage::PumpCooldown;
                cooldown_secs = PUMP_COOLDOWN_SECS;
                pump_on = true;
            } else {
                pump_on = true;
                chiller_on = true;
            }
        }
        CoolingStage::PumpCooldown => {
            if conditions {
                // Water is still moving; rejoin the active stage directly.
                stage = CoolingStage::CoolingActive;
                pump_on = true;
                chiller_on = true;
            } else if cooldown_secs <= 0.0 {
                stage = CoolingStage::Idle;
            } else {
                pump_on = true;
            }
        }
    }

    // Counters advance after the stage logic so a fresh warmup counts
    // dwell time from zero.
    match stage {
        CoolingStage::PumpWarmup => warmup_secs += input.dt_secs,
        CoolingStage::PumpCooldown => cooldown_secs -= input.dt_secs,
        _ => {
            warmup_secs = 0.0;
        }
    }

    // Valve control while the chiller runs; heating when cold.
    let control_temp = supply.unwrap_or(input.current_temp);
    let error = control_temp - setpoint;
    let mut heating = 0.0;
    if chiller_on && error > 0.0 {
        let out = pid_run(
            control_temp,
            setpoint,
            &cooling_params(),
            input.dt_secs,
            &state.pid_state("cooling"),
        );
        cooling_valve = out.output;
        state.set_pid_state("cooling", out.state);
        state.set_pid_state("heating", PidState::default());
    } else if fan_commanded && error < -1.0 {
        let out = pid_run(
            control_temp,
            setpoint,
            &heating_params(),
            input.dt_secs,
            &state.pid_state("heating"),
        );
        heating = out.output;
        state.set_pid_state("heating", out.state);
        state.set_pid_state("cooling", PidState::default());
    } else {
        state.set_pid_state("cooling", PidState::default());
        state.set_pid_state("heating", PidState::default());
    }

    state.set_typed("cooling_stage", &stage);
    state.set_f64("warmup_secs", warmup_secs);
    state.set_f64("cooldown_secs", cooldown_secs.max(0.0));

    let damper = match outdoor {
        Some(oat) if fan_commanded && occupied => input.location.damper.position_for(oat),
        _ => 0.0,
    };

    debug!(
        equipment_id = %input.equipment.id,
        stage = ?stage,
        pump_on,
        chiller_on,
        "Hopebridge AHU-1 tick"
    );

    commands
        .set(CommandType::HeatingValvePosition, heating)
        .set(CommandType::CoolingValvePosition, cooling_valve)
        .set(CommandType::FanEnabled, fan_commanded)
        .set(
            CommandType::FanSpeed,
            if fan_commanded { "medium" } else { "off" },
        )
        .set(CommandType::OutdoorDamperPosition, damper)
        .set(CommandType::UnitEnable, fan_commanded)
        .set(CommandType::CwCircPumpEnabled, pump_on)
        .set(CommandType::ChillerEnabled, chiller_on);

    AlgorithmOutput {
        commands,
        state,
        ..Default::default()
    }
}

/// AHU-2: DX stage with 7.5°F hysteresis and a 15-minute minimum runtime.
fn evaluate_dx(input: &AlgorithmInput) -> AlgorithmOutput {
    let mut state = input.state.clone();
    let mut commands = CommandBag::new();

    let outdoor = input.outdoor_temp();
    let supply = input.supply_temp();
    let occupied = input.is_occupied();
    let curve = input.location.reset_curve("air-handler");
    let (setpoint, _) = resolve_setpoint(input.settings, curve, outdoor, DEFAULT_SAT_F);

    commands
        .set(CommandType::SupplyAirTempSetpoint, setpoint)
        .set(CommandType::IsOccupied, occupied);

    if let Some(trip) = safety_check(input, &mut commands) {
        state.set_bool("dx_engaged", false);
        state.set_f64("dx_run_secs", 0.0);
        return AlgorithmOutput {
            commands,
            state,
            safety: Some(trip),
        };
    }

    let fan_commanded =
        occupied && input.settings.unit_enable_override() != Some(false);

    let was_engaged = state.get_bool("dx_engaged").unwrap_or(false);
    let mut run_secs = state.get_f64("dx_run_secs").unwrap_or(0.0);

    let half_band = DX_HYSTERESIS_F / 2.0;
    let engaged = if !fan_commanded {
        false
    } else {
        match supply {
            Some(supply) => {
                if supply > setpoint + half_band {
                    true
                } else if supply < setpoint - half_band {
                    // Minimum runtime holds the stage in.
                    was_engaged && run_secs < DX_MIN_RUN_SECS
                } else {
                    was_engaged
                }
            }
            None => was_engaged,
        }
    };

    if engaged {
        run_secs = if was_engaged {
            run_secs + input.dt_secs
        } else {
            0.0
        };
    } else {
        run_secs = 0.0;
    }
    state.set_bool("dx_engaged", engaged);
    state.set_f64("dx_run_secs", run_secs);

    let damper = match outdoor {
        Some(oat) if fan_commanded && occupied => input.location.damper.position_for(oat),
        _ => 0.0,
    };

    debug!(
        equipment_id = %input.equipment.id,
        engaged,
        run_secs,
        "Hopebridge AHU-2 tick"
    );

    commands
        .set(CommandType::HeatingValvePosition, 0.0)
        .set(CommandType::CoolingValvePosition, 0.0)
        .set(CommandType::FanEnabled, fan_commanded)
        .set(
            CommandType::FanSpeed,
            if fan_commanded { "medium" } else { "off" },
        )
        .set(CommandType::OutdoorDamperPosition, damper)
        .set(CommandType::UnitEnable, fan_commanded)
        .set(CommandType::DxEnabled, engaged);

    AlgorithmOutput {
        commands,
        state,
        ..Default::default()
    }
}
