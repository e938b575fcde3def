//! Steam bundle control
//!
//! Outdoor-air-reset water setpoint with a warm-weather cutoff, a
//! hot-water pump interlock, and two-valve staging driven by a single PID
//! output.

use tracing::{debug, warn};

use super::common::{AlgorithmInput, AlgorithmOutput, SafetyTrip, STEAM_SHUTOFF_F};
use super::Algorithm;
use crate::control::{pid_run, PidParams, PidState};
use crate::types::{CommandBag, CommandType};

/// Above this outdoor temperature the bundle shuts down entirely.
const OAT_CUTOFF_F: f64 = 70.0;

/// Bundle setpoint when no schedule or override applies.
const DEFAULT_SETPOINT_F: f64 = 140.0;

/// Pump interlock: at least one hot-water pump must draw more than this.
const PUMP_INTERLOCK_AMPS: f64 = 10.0;

/// Ordered candidates for hot-water pump amp readings.
const HW_PUMP_AMP_CANDIDATES: [&str; 3] = ["HWPump1Amps", "HWPump2Amps", "HWPumpAmps"];

/// PID breakpoint between the primary and secondary valves.
const STAGE_SPLIT: f64 = 33.0;

fn bundle_params() -> PidParams {
    PidParams {
        kp: 2.0,
        ki: 0.1,
        kd: 0.0,
        output_min: 0.0,
        output_max: 100.0,
        reverse_acting: true,
        max_integral: 20.0,
        enabled: true,
    }
}

/// Split one PID output across the staged valves: the primary strokes
/// fully over the first third of demand, the secondary over the rest.
pub fn stage_valves(u: f64) -> (f64, f64) {
    let u = u.clamp(0.0, 100.0);
    if u <= STAGE_SPLIT {
        (u * 100.0 / STAGE_SPLIT, 0.0)
    } else {
        (100.0, (u - STAGE_SPLIT) * 100.0 / (100.0 - STAGE_SPLIT))
    }
}

/// Base steam bundle algorithm.
pub struct SteamBundle;

impl Algorithm for SteamBundle {
    fn name(&self) -> &str {
        "steam-bundle/base"
    }

    fn evaluate(&self, input: &AlgorithmInput) -> AlgorithmOutput {
        let mut state = input.state.clone();
        let mut commands = CommandBag::new();

        let outdoor = input.outdoor_temp();
        let bundle_temp = input.supply_temp();
        let curve = input.location.reset_curve("steam-bundle");

        let setpoint = match input.settings.temperature_setpoint() {
            Some(sp) => sp,
            None => match (curve, outdoor) {
                (Some(curve), Some(oat)) => curve.setpoint_for(oat),
                _ => DEFAULT_SETPOINT_F,
            },
        };
        commands.set(CommandType::TemperatureSetpoint, setpoint);

        // Hi-limit closes both valves before anything else is considered.
        if let Some(bundle_temp) = bundle_temp {
            if bundle_temp >= STEAM_SHUTOFF_F {
                let trip = SafetyTrip::new(
                    "hi-limit",
                    format!("bundle {bundle_temp:.1}F at or above {STEAM_SHUTOFF_F:.0}F"),
                );
                warn!(equipment_id = %input.equipment.id, bundle_temp, "Steam bundle hi-limit");
                commands
                    .set(CommandType::PrimaryValvePosition, 0.0)
                    .set(CommandType::SecondaryValvePosition, 0.0)
                    .set(CommandType::UnitEnable, false)
                    .set(CommandType::SafetyStatus, trip.reason.as_str());
                state.set_pid_state("bundle", PidState::default());
                return AlgorithmOutput {
                    commands,
                    state,
                    safety: Some(trip),
                };
            }
        }

        // Pump interlock: steam against dead water scalds the bundle.
        let pump_amps = HW_PUMP_AMP_CANDIDATES
            .iter()
            .filter_map(|name| input.metrics.get_f64(name))
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, f64::max);
        let pump_proven = pump_amps > PUMP_INTERLOCK_AMPS;
        if !pump_proven {
            let trip = SafetyTrip::new(
                "pump-interlock",
                format!("no hot-water pump above {PUMP_INTERLOCK_AMPS:.0}A"),
            );
            commands
                .set(CommandType::PrimaryValvePosition, 0.0)
                .set(CommandType::SecondaryValvePosition, 0.0)
                .set(CommandType::UnitEnable, false)
                .set(CommandType::PumpStatus, "not-proven")
                .set(CommandType::SafetyStatus, trip.reason.as_str());
            state.set_pid_state("bundle", PidState::default());
            return AlgorithmOutput {
                commands,
                state,
                safety: Some(trip),
            };
        }
        commands.set(CommandType::PumpStatus, "proven");

        // Warm-weather cutoff and operator force-off.
        let cutoff = outdoor.map(|oat| oat >= OAT_CUTOFF_F).unwrap_or(false);
        if cutoff || input.settings.unit_enable_override() == Some(false) {
            commands
                .set(CommandType::PrimaryValvePosition, 0.0)
                .set(CommandType::SecondaryValvePosition, 0.0)
                .set(CommandType::UnitEnable, false)
                .set(CommandType::SafetyStatus, "normal");
            state.set_pid_state("bundle", PidState::default());
            return AlgorithmOutput {
                commands,
                state,
                ..Default::default()
            };
        }

        let control_temp = bundle_temp.unwrap_or(input.current_temp);
        let out = pid_run(
            control_temp,
            setpoint,
            &bundle_params(),
            input.dt_secs,
            &state.pid_state("bundle"),
        );
        state.set_pid_state("bundle", out.state);
        let (primary, secondary) = stage_valves(out.output);

        debug!(
            equipment_id = %input.equipment.id,
            demand = out.output,
            primary,
            secondary,
            "Steam bundle tick"
        );

        commands
            .set(CommandType::PrimaryValvePosition, primary)
            .set(CommandType::SecondaryValvePosition, secondary)
            .set(CommandType::UnitEnable, true)
            .set(CommandType::SafetyStatus, "normal");

        AlgorithmOutput {
            commands,
            state,
            ..Default::default()
        }
    }
}
