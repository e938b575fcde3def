//! One task tick
//!
//! Read-once, compute, write: the tick snapshots telemetry and settings
//! for every equipment of one type at one location, runs group
//! coordination sequentially, evaluates each algorithm, filters the bag
//! to the allowed command set, and writes. Failures degrade per equipment
//! and never escape the tick.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::config::LocationConfig;
use crate::coordination::{evaluate_group, LeadLagEvent, LeadLagGroup, MemberHealth};
use crate::equipment::{
    boiler::boiler_health, chiller::chiller_health, pump::pump_health, Algorithm, AlgorithmInput,
    AlgorithmOutput, LeadAssignment,
};
use crate::equipment::common::resolve_control_temp;
use crate::runtime::Runtime;
use crate::state::group_key;
use crate::tsdb::FieldValue;
use crate::types::{
    CommandBag, CommandRecord, CommandType, ControlSettings, Equipment, EquipmentType,
    MetricSnapshot, SettingsLayer,
};

/// Window over which UI commands count as fresh.
const UI_COMMAND_WINDOW_MINUTES: u32 = 15;

/// What one tick did, for health accounting.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub equipment_evaluated: u64,
    pub commands_written: u64,
    pub failed: bool,
    pub detail: String,
}

impl TickOutcome {
    fn degrade(&mut self, detail: String) {
        self.failed = true;
        if self.detail.is_empty() {
            self.detail = detail;
        } else {
            self.detail = format!("{}; {}", self.detail, detail);
        }
    }
}

/// The safe command bag emitted when an algorithm fails: unit disabled,
/// valves closed, fan off.
pub fn safe_default_bag(equipment_type: EquipmentType) -> CommandBag {
    let mut bag = CommandBag::new();
    bag.set(CommandType::UnitEnable, false);
    match equipment_type {
        EquipmentType::FanCoil | EquipmentType::AirHandler => {
            bag.set(CommandType::HeatingValvePosition, 0.0)
                .set(CommandType::CoolingValvePosition, 0.0)
                .set(CommandType::FanEnabled, false)
                .set(CommandType::FanSpeed, "off")
                .set(CommandType::OutdoorDamperPosition, 0.0);
        }
        EquipmentType::Boiler => {
            bag.set(CommandType::Firing, 0.0);
        }
        EquipmentType::SteamBundle => {
            bag.set(CommandType::PrimaryValvePosition, 0.0)
                .set(CommandType::SecondaryValvePosition, 0.0);
        }
        EquipmentType::Pump | EquipmentType::Chiller => {}
    }
    bag
}

/// Run one tick for every equipment of `equipment_type` at the location.
pub async fn run_type_tick(
    runtime: &Arc<Runtime>,
    location: &LocationConfig,
    equipment_type: EquipmentType,
    dt_secs: f64,
) -> TickOutcome {
    let mut outcome = TickOutcome::default();

    let equipment_list = runtime
        .metadata
        .equipment_at(&location.id, equipment_type)
        .await;
    if equipment_list.is_empty() {
        return outcome;
    }

    // UI command window for this (location, type), one read per tick.
    let ui_layers = match runtime
        .gateway
        .query_ui_commands(&location.id, equipment_type.as_str(), UI_COMMAND_WINDOW_MINUTES)
        .await
    {
        Ok(layers) => layers,
        Err(e) => {
            outcome.degrade(format!("UI command read failed: {e}"));
            HashMap::new()
        }
    };

    // Telemetry snapshot per equipment, read once before any compute.
    // The gateway permits concurrent callers, so the reads fan out.
    let reads = join_all(equipment_list.iter().map(|equipment| {
        let gateway = &runtime.gateway;
        async move {
            (
                equipment.id.clone(),
                gateway.query_latest_metrics(&equipment.id).await,
            )
        }
    }))
    .await;
    let mut snapshots: HashMap<String, MetricSnapshot> = HashMap::new();
    for (equipment_id, result) in reads {
        match result {
            Ok(snapshot) => {
                snapshots.insert(equipment_id, snapshot);
            }
            Err(e) => {
                outcome.degrade(format!("metrics read failed for {equipment_id}: {e}"));
                snapshots.insert(equipment_id, MetricSnapshot::new());
            }
        }
    }

    // Group coordination runs sequentially before any member evaluates,
    // so exactly one member is promoted or demoted per tick.
    let now_epoch = Utc::now().timestamp();
    let leads = coordinate_groups(
        runtime,
        location,
        equipment_type,
        &equipment_list,
        &snapshots,
        now_epoch,
    )
    .await;

    let local_time = (Utc::now() + ChronoDuration::hours(location.utc_offset_hours as i64)).time();

    for equipment in &equipment_list {
        let snapshot = snapshots
            .get(&equipment.id)
            .cloned()
            .unwrap_or_default();

        // Persisted last commands are the medium settings layer; a read
        // failure degrades to UI + defaults.
        let persisted = match runtime.gateway.query_last_commands(&equipment.id).await {
            Ok(layer) => layer,
            Err(e) => {
                outcome.degrade(format!(
                    "persisted settings read failed for {}: {e}",
                    equipment.id
                ));
                SettingsLayer::new()
            }
        };
        let ui = ui_layers.get(&equipment.id).cloned().unwrap_or_default();
        let settings = ControlSettings::merge(&ui, &persisted, &SettingsLayer::new());

        let state = runtime.store.snapshot(&equipment.id);
        let (current_temp, _temp_source) = resolve_control_temp(location, &snapshot);

        let input = AlgorithmInput {
            equipment,
            location,
            metrics: &snapshot,
            settings: &settings,
            current_temp,
            state: &state,
            dt_secs,
            local_time,
            now_epoch,
            lead: leads.get(&equipment.id).cloned(),
        };

        let Some(algorithm) = runtime
            .dispatcher
            .resolve(equipment_type, &location.id)
        else {
            error!(
                equipment_id = %equipment.id,
                equipment_type = %equipment_type,
                "No algorithm registered; emitting safe bag"
            );
            let bag = safe_default_bag(equipment_type);
            let written = write_bag(runtime, equipment, bag, &mut outcome).await;
            outcome.commands_written += written;
            continue;
        };

        // The algorithm is synchronous and pure; a panic degrades to the
        // safe bag and is contained to this equipment's tick.
        let result =
            std::panic::catch_unwind(AssertUnwindSafe(|| algorithm.evaluate(&input)));
        let output = match result {
            Ok(output) => output,
            Err(cause) => {
                let detail = cause
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| cause.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    equipment_id = %equipment.id,
                    "Algorithm panicked ({detail}); emitting safe bag"
                );
                outcome.degrade(format!("algorithm panic for {}", equipment.id));
                AlgorithmOutput {
                    commands: safe_default_bag(equipment_type),
                    state: state.clone(),
                    safety: None,
                }
            }
        };

        outcome.equipment_evaluated += 1;

        if let Some(trip) = &output.safety {
            warn!(
                equipment_id = %equipment.id,
                kind = %trip.kind,
                reason = %trip.reason,
                "Safety interlock active"
            );
            write_safety_event(runtime, equipment, &trip.kind, &trip.reason).await;
        }

        let mut bag = output.commands;
        let removed = bag.retain_allowed(equipment_type);
        if removed > 0 {
            warn!(
                equipment_id = %equipment.id,
                removed,
                "Dropped commands outside the allowed set"
            );
        }

        let written = write_bag(runtime, equipment, bag, &mut outcome).await;
        outcome.commands_written += written;

        // State merges back only after the tick's writes are issued.
        runtime.store.merge(&equipment.id, output.state);
    }

    outcome
}

/// Evaluate every lead-lag group for this (location, type) and return the
/// per-member assignments.
async fn coordinate_groups(
    runtime: &Arc<Runtime>,
    location: &LocationConfig,
    equipment_type: EquipmentType,
    equipment_list: &[Equipment],
    snapshots: &HashMap<String, MetricSnapshot>,
    now_epoch: i64,
) -> HashMap<String, LeadAssignment> {
    let mut leads = HashMap::new();

    for group_config in runtime.site.groups_at(&location.id, equipment_type) {
        let key = group_key(&group_config.id);
        let mut group_state = runtime.store.snapshot(&key);
        let mut group: LeadLagGroup = group_state
            .get_typed("leadlag")
            .unwrap_or_else(|| {
                let mut g = LeadLagGroup::new(&group_config.id, group_config.member_ids.clone());
                g.auto_failover = group_config.auto_failover;
                g.use_lead_lag = group_config.use_lead_lag;
                g.changeover_interval_days = group_config.changeover_interval_days;
                g
            });
        // Membership and policy follow the config if it changed.
        group.member_ids = group_config.member_ids.clone();
        group.auto_failover = group_config.auto_failover;
        group.use_lead_lag = group_config.use_lead_lag;
        group.changeover_interval_days = group_config.changeover_interval_days;

        let health: Vec<MemberHealth> = group
            .member_ids
            .iter()
            .map(|member_id| {
                let snapshot = snapshots.get(member_id).cloned().unwrap_or_default();
                let equipment = equipment_list
                    .iter()
                    .find(|e| e.id == *member_id)
                    .cloned()
                    .unwrap_or_else(|| {
                        Equipment::new(member_id, equipment_type, &location.id)
                    });
                match equipment_type {
                    EquipmentType::Boiler => boiler_health(&equipment, location, &snapshot),
                    EquipmentType::Pump => {
                        let commanded_on = runtime
                            .store
                            .snapshot(member_id)
                            .get_bool("commanded_on")
                            .unwrap_or(false);
                        pump_health(&equipment, &snapshot, commanded_on)
                    }
                    EquipmentType::Chiller => chiller_health(&equipment, &snapshot),
                    _ => MemberHealth::healthy(member_id),
                }
            })
            .collect();

        let (updated, decision) = evaluate_group(&group, &health, now_epoch);
        for event in &decision.events {
            info!(
                group = %event.group_id,
                kind = ?event.kind,
                old = ?event.old_leader,
                new = %event.new_leader,
                "Lead-lag transition"
            );
            write_leadlag_event(runtime, event).await;
        }

        for member_id in &updated.member_ids {
            leads.insert(
                member_id.clone(),
                LeadAssignment {
                    group_id: updated.id.clone(),
                    leader_id: decision.leader_id.clone().unwrap_or_default(),
                    is_lead: decision.leader_id.as_deref() == Some(member_id),
                    reason: decision.reason.clone(),
                },
            );
        }

        group_state.set_typed("leadlag", &updated);
        runtime.store.merge(&key, group_state);
    }

    leads
}

/// Write every command in the bag. Returns the number written; failures
/// degrade the outcome but never abort the tick.
async fn write_bag(
    runtime: &Arc<Runtime>,
    equipment: &Equipment,
    bag: CommandBag,
    outcome: &mut TickOutcome,
) -> u64 {
    if runtime.engine.dry_run {
        info!(
            equipment_id = %equipment.id,
            commands = bag.len(),
            "Dry run: skipping command writes"
        );
        return 0;
    }

    let timestamp_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut written = 0u64;
    for (command_type, value) in bag.iter() {
        let record = CommandRecord {
            equipment_id: equipment.id.clone(),
            location_id: equipment.location_id.clone(),
            equipment_type: equipment.equipment_type,
            command_type: *command_type,
            value: value.clone(),
            timestamp_ns,
        };
        match runtime.gateway.write_command(&record, true).await {
            Ok(_) => written += 1,
            Err(e) => {
                outcome.degrade(format!(
                    "write failed for {} {}: {e}",
                    equipment.id,
                    command_type.as_str()
                ));
            }
        }
    }
    written
}

/// Best-effort structured safety event record.
async fn write_safety_event(
    runtime: &Arc<Runtime>,
    equipment: &Equipment,
    kind: &str,
    reason: &str,
) {
    if runtime.engine.dry_run {
        return;
    }
    let mut tags = std::collections::BTreeMap::new();
    tags.insert("equipment_id".to_string(), equipment.id.clone());
    tags.insert("location_id".to_string(), equipment.location_id.clone());
    tags.insert(
        "equipment_type".to_string(),
        equipment.equipment_type.as_str().to_string(),
    );
    tags.insert("kind".to_string(), kind.to_string());
    let mut fields = std::collections::BTreeMap::new();
    fields.insert(
        "reason".to_string(),
        FieldValue::Text(reason.to_string()),
    );
    let timestamp_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    if let Err(e) = runtime
        .gateway
        .write_audit_event("safety_event", &tags, &fields, timestamp_ns)
        .await
    {
        warn!(equipment_id = %equipment.id, "Safety event write failed: {}", e);
    }
}

/// Best-effort lead-lag transition record.
async fn write_leadlag_event(runtime: &Arc<Runtime>, event: &LeadLagEvent) {
    if runtime.engine.dry_run {
        return;
    }
    let mut tags = std::collections::BTreeMap::new();
    tags.insert("group_id".to_string(), event.group_id.clone());
    tags.insert("kind".to_string(), format!("{:?}", event.kind));
    let mut fields = std::collections::BTreeMap::new();
    fields.insert(
        "new_leader".to_string(),
        FieldValue::Text(event.new_leader.clone()),
    );
    if let Some(old) = &event.old_leader {
        fields.insert("old_leader".to_string(), FieldValue::Text(old.clone()));
    }
    fields.insert(
        "reason".to_string(),
        FieldValue::Text(event.reason.clone()),
    );
    let timestamp_ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    if let Err(e) = runtime
        .gateway
        .write_audit_event("leadlag_event", &tags, &fields, timestamp_ns)
        .await
    {
        warn!(group = %event.group_id, "Lead-lag event write failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_default_bags_disable_the_unit() {
        for equipment_type in EquipmentType::ALL {
            let bag = safe_default_bag(equipment_type);
            assert_eq!(bag.get_bool(CommandType::UnitEnable), Some(false));
            // The safe bag must itself survive the allowed-set filter.
            let mut filtered = bag.clone();
            assert_eq!(filtered.retain_allowed(equipment_type), 0);
        }
    }

    #[test]
    fn boiler_safe_bag_stops_firing() {
        let bag = safe_default_bag(EquipmentType::Boiler);
        assert_eq!(bag.get_f64(CommandType::Firing), Some(0.0));
    }

    #[test]
    fn steam_safe_bag_closes_both_valves() {
        let bag = safe_default_bag(EquipmentType::SteamBundle);
        assert_eq!(bag.get_f64(CommandType::PrimaryValvePosition), Some(0.0));
        assert_eq!(bag.get_f64(CommandType::SecondaryValvePosition), Some(0.0));
    }
}
