//! Boiler control
//!
//! Outdoor-air-reset water setpoint, lead-lag aware firing with a 2°F
//! start band, and the 170°F emergency shutoff.

use tracing::{debug, warn};

use super::common::{
    resolve_setpoint, AlgorithmInput, AlgorithmOutput, SafetyTrip, BOILER_SHUTOFF_F,
    FREEZESTAT_TRIP_F,
};
use super::Algorithm;
use crate::coordination::MemberHealth;
use crate::config::LocationConfig;
use crate::types::{CommandBag, CommandType, Equipment, MetricSnapshot};

/// Firing starts when the supply is this far under setpoint.
const FIRING_START_BAND_F: f64 = 2.0;

/// Water setpoint when no schedule or override applies.
const DEFAULT_WATER_SETPOINT_F: f64 = 140.0;

/// Status strings that indicate a boiler fault.
const FAULT_STATUSES: [&str; 4] = ["fault", "alarm", "lockout", "failed"];

/// Health predicate for the lead-lag coordinator: supply over the
/// emergency limit or a fault status means the member cannot lead.
pub fn boiler_health(
    equipment: &Equipment,
    location: &LocationConfig,
    metrics: &MetricSnapshot,
) -> MemberHealth {
    if let Some(supply) = metrics.first_finite(&location.temp_sources.supply) {
        if supply > BOILER_SHUTOFF_F {
            return MemberHealth::failed(
                &equipment.id,
                &format!("supply {supply:.1}F over {BOILER_SHUTOFF_F:.0}F limit"),
            );
        }
    }
    if let Some(status) = metrics.get_str("BoilerStatus") {
        let status_lower = status.to_lowercase();
        if FAULT_STATUSES.iter().any(|f| status_lower.contains(f)) {
            return MemberHealth::failed(&equipment.id, &format!("status {status}"));
        }
    }
    MemberHealth::healthy(&equipment.id)
}

/// Base boiler algorithm, shared by every location; the OAR schedule is
/// the per-location part.
pub struct Boiler;

impl Algorithm for Boiler {
    fn name(&self) -> &str {
        "boiler/base"
    }

    fn evaluate(&self, input: &AlgorithmInput) -> AlgorithmOutput {
        let mut state = input.state.clone();
        let mut commands = CommandBag::new();

        let outdoor = input.outdoor_temp();
        let supply = input.supply_temp();
        let curve = input.location.reset_curve("boiler");
        let water_setpoint = match input.settings.get_f64("waterTempSetpoint") {
            Some(sp) if sp.is_finite() => sp,
            _ => {
                resolve_setpoint(input.settings, curve, outdoor, DEFAULT_WATER_SETPOINT_F).0
            }
        };

        // Lead-lag identity is reported every tick, trip or not.
        let is_lead = input.is_lead();
        if let Some(lead) = &input.lead {
            commands
                .set(CommandType::LeadLagGroupId, lead.group_id.as_str())
                .set(CommandType::LeadEquipmentId, lead.leader_id.as_str())
                .set(CommandType::LeadLagReason, lead.reason.as_str());
        }
        commands.set(CommandType::IsLead, if is_lead { 1.0 } else { 0.0 });
        commands.set(CommandType::WaterTempSetpoint, water_setpoint);
        if let Some(outdoor) = outdoor {
            commands.set(CommandType::OutdoorTemp, outdoor);
        }
        if let Some(supply) = supply {
            commands.set(CommandType::SupplyTemp, supply);
        }

        // Emergency shutoff overrides everything, leader or not.
        if let Some(supply) = supply {
            if supply > BOILER_SHUTOFF_F {
                let trip = SafetyTrip::new(
                    "emergency-shutoff",
                    format!("supply {supply:.1}F exceeds {BOILER_SHUTOFF_F:.0}F limit"),
                );
                warn!(
                    equipment_id = %input.equipment.id,
                    supply,
                    "Boiler emergency shutoff"
                );
                commands
                    .set(CommandType::UnitEnable, false)
                    .set(CommandType::Firing, 0.0)
                    .set(CommandType::SafetyShutoff, true)
                    .set(CommandType::SafetyReason, trip.reason.as_str());
                state.set_bool("firing", false);
                return AlgorithmOutput {
                    commands,
                    state,
                    safety: Some(trip),
                };
            }
            if supply <= FREEZESTAT_TRIP_F {
                let trip = SafetyTrip::new(
                    "freezestat",
                    format!("supply {supply:.1}F at or below {FREEZESTAT_TRIP_F:.0}F"),
                );
                commands
                    .set(CommandType::UnitEnable, false)
                    .set(CommandType::Firing, 0.0)
                    .set(CommandType::SafetyShutoff, true)
                    .set(CommandType::SafetyReason, trip.reason.as_str());
                state.set_bool("firing", false);
                return AlgorithmOutput {
                    commands,
                    state,
                    safety: Some(trip),
                };
            }
        }

        commands.set(CommandType::SafetyShutoff, false);

        // Standby members hold off until the coordinator promotes them.
        if !is_lead {
            commands
                .set(CommandType::UnitEnable, false)
                .set(CommandType::Firing, 0.0);
            state.set_bool("firing", false);
            return AlgorithmOutput {
                commands,
                state,
                ..Default::default()
            };
        }

        if input.settings.unit_enable_override() == Some(false) {
            commands
                .set(CommandType::UnitEnable, false)
                .set(CommandType::Firing, 0.0);
            state.set_bool("firing", false);
            return AlgorithmOutput {
                commands,
                state,
                ..Default::default()
            };
        }

        // Firing latch: start when the supply sags more than the start
        // band under setpoint, stop once it reaches setpoint, hold in
        // between. No supply reading keeps the previous firing state.
        let was_firing = state.get_bool("firing").unwrap_or(false);
        let firing = match supply {
            Some(supply) => {
                let deficit = water_setpoint - supply;
                if deficit > FIRING_START_BAND_F {
                    true
                } else if deficit <= 0.0 {
                    false
                } else {
                    was_firing
                }
            }
            None => was_firing,
        };
        state.set_bool("firing", firing);

        // Runtime accounting while firing.
        if firing {
            let hours = state.get_f64("runtime_hours").unwrap_or(0.0);
            state.set_f64("runtime_hours", hours + input.dt_secs / 3600.0);
        }

        debug!(
            equipment_id = %input.equipment.id,
            firing,
            setpoint = water_setpoint,
            "Boiler tick"
        );

        commands
            .set(CommandType::UnitEnable, true)
            .set(CommandType::Firing, if firing { 1.0 } else { 0.0 });

        AlgorithmOutput {
            commands,
            state,
            ..Default::default()
        }
    }
}
