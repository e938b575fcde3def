//! Pump control
//!
//! Outdoor-temperature hysteresis enable with distinct on/off thresholds
//! per service, lead-lag standby with extreme-condition overrides, and
//! amp-based failure detection.

use tracing::{debug, warn};

use super::common::{AlgorithmInput, AlgorithmOutput};
use super::Algorithm;
use crate::coordination::{standby_override, MemberHealth};
use crate::types::{CommandBag, CommandType, Equipment, MetricSnapshot, PumpKind};

/// Below this draw a commanded-on pump is considered failed.
const FAILURE_AMPS: f64 = 0.5;

/// Ordered candidates for the pump amp reading.
const AMP_CANDIDATES: [&str; 3] = ["PumpAmps", "MotorAmps", "Amps"];

/// Ordered candidates for the pump status string.
const STATUS_CANDIDATES: [&str; 2] = ["PumpStatus", "Status"];

fn pump_amps(metrics: &MetricSnapshot) -> Option<f64> {
    AMP_CANDIDATES
        .iter()
        .filter_map(|name| metrics.get_f64(name))
        .find(|v| v.is_finite())
}

fn pump_status(metrics: &MetricSnapshot) -> Option<&str> {
    STATUS_CANDIDATES
        .iter()
        .filter_map(|name| metrics.get_str(name))
        .next()
}

/// Failure predicate: drawing under the floor while commanded on and not
/// reporting itself off.
pub fn pump_failed(metrics: &MetricSnapshot, commanded_on: bool) -> bool {
    if !commanded_on {
        return false;
    }
    let status_off = pump_status(metrics)
        .map(|s| s.eq_ignore_ascii_case("off"))
        .unwrap_or(false);
    if status_off {
        return false;
    }
    match pump_amps(metrics) {
        Some(amps) => amps < FAILURE_AMPS,
        None => false,
    }
}

/// Health input for the lead-lag coordinator. `commanded_on` is the
/// previous tick's enable command, carried in state.
pub fn pump_health(
    equipment: &Equipment,
    metrics: &MetricSnapshot,
    commanded_on: bool,
) -> MemberHealth {
    if pump_failed(metrics, commanded_on) {
        let amps = pump_amps(metrics).unwrap_or(0.0);
        MemberHealth::failed(
            &equipment.id,
            &format!("amps {amps:.2}A under {FAILURE_AMPS}A while commanded on"),
        )
    } else {
        MemberHealth::healthy(&equipment.id)
    }
}

/// Base pump algorithm for both hot-water and chilled-water service.
pub struct Pump;

impl Algorithm for Pump {
    fn name(&self) -> &str {
        "pump/base"
    }

    fn evaluate(&self, input: &AlgorithmInput) -> AlgorithmOutput {
        let mut state = input.state.clone();
        let mut commands = CommandBag::new();

        let kind = input.equipment.pump_kind.unwrap_or(PumpKind::HotWater);
        let band = input.location.pump_thresholds.band_for(kind);
        let outdoor = input.outdoor_temp();
        let amps = pump_amps(input.metrics);
        let status = pump_status(input.metrics).map(str::to_string);
        let commanded_on = state.get_bool("commanded_on").unwrap_or(false);

        // Failure accounting feeds the coordinator's next health check.
        if pump_failed(input.metrics, commanded_on) {
            let failures = state.get_f64("failure_count").unwrap_or(0.0) + 1.0;
            state.set_f64("failure_count", failures);
            warn!(
                equipment_id = %input.equipment.id,
                amps = amps.unwrap_or(0.0),
                failures,
                "Pump commanded on but drawing no current"
            );
        }

        // Hysteresis latch follows outdoor temperature.
        let engaged = state.get_bool("latch.engaged").unwrap_or(false);
        let engaged = match outdoor {
            Some(oat) => band.update(engaged, oat),
            None => engaged,
        };
        state.set_bool("latch.engaged", engaged);

        // Leader follows the latch; standby runs only on extreme-condition
        // or manual override.
        let is_lead = input.is_lead();
        let standby_reason = outdoor.and_then(|oat| standby_override(kind, oat));
        let manual = input.settings.manual_lag_override();
        let enabled = if input.settings.unit_enable_override() == Some(false) {
            false
        } else if is_lead {
            engaged
        } else {
            engaged && (standby_reason.is_some() || manual)
        };

        // Runtime accumulates while enabled.
        let mut runtime_hours = state.get_f64("runtime_hours").unwrap_or(0.0);
        if enabled {
            runtime_hours += input.dt_secs / 3600.0;
            state.set_f64("runtime_hours", runtime_hours);
        }
        state.set_bool("commanded_on", enabled);

        debug!(
            equipment_id = %input.equipment.id,
            enabled,
            is_lead,
            outdoor = outdoor.unwrap_or(f64::NAN),
            "Pump tick"
        );

        commands
            .set(CommandType::UnitEnable, enabled)
            .set(CommandType::IsLead, if is_lead { 1.0 } else { 0.0 })
            .set(CommandType::PumpType, kind.as_str())
            .set(CommandType::PumpRuntime, runtime_hours)
            .set(
                CommandType::FailureCount,
                state.get_f64("failure_count").unwrap_or(0.0),
            )
            .set(
                CommandType::TemperatureSource,
                input
                    .location
                    .temp_sources
                    .outdoor
                    .first()
                    .map(String::as_str)
                    .unwrap_or("outdoor"),
            );
        if let Some(oat) = outdoor {
            commands.set(CommandType::OutdoorTemperature, oat);
        }
        if let Some(amps) = amps {
            commands.set(CommandType::PumpAmps, amps);
        }
        if let Some(status) = status {
            commands.set(CommandType::PumpStatus, status);
        }
        if let Some(lead) = &input.lead {
            let reason = standby_reason
                .filter(|_| !is_lead && enabled)
                .unwrap_or_else(|| lead.reason.clone());
            commands
                .set(CommandType::LeadLagGroupId, lead.group_id.as_str())
                .set(CommandType::LeadEquipmentId, lead.leader_id.as_str())
                .set(CommandType::LeadLagReason, reason);
        }

        AlgorithmOutput {
            commands,
            state,
            ..Default::default()
        }
    }
}
