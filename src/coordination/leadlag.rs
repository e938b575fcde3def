//! Lead-lag coordination state machine
//!
//! Each redundant group carries a [`LeadLagGroup`] record in the state
//! store. Once per task tick the processor feeds it the members' health
//! and the clock; [`evaluate_group`] returns the updated record plus a
//! decision (who leads, why, and any transition events).
//!
//! Cadence discipline: health checks run every 30 s, rotation checks every
//! 5 min, both rate-limited inside the group record so the caller can
//! simply invoke this every tick. Rotation and failover never fire in the
//! same tick for the same group.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::PumpKind;

/// Seconds between leader health evaluations.
const HEALTH_CHECK_INTERVAL_SECS: i64 = 30;

/// Seconds between rotation-due evaluations.
const ROTATION_CHECK_INTERVAL_SECS: i64 = 300;

/// Outdoor temperature at or above which a second chilled-water pump runs.
pub const CW_STANDBY_OVERRIDE_F: f64 = 90.0;

/// Outdoor temperature at or below which a second hot-water pump runs.
pub const HW_STANDBY_OVERRIDE_F: f64 = 20.0;

/// Coordination phase of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupPhase {
    #[default]
    NormalLeaderHealthy,
    FailoverInProgress,
    RotationPending,
}

/// Persistent coordination record for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadLagGroup {
    pub id: String,
    /// Members in rotation order.
    pub member_ids: Vec<String>,
    /// Current leader; seeded to the first member on first evaluation.
    pub leader_id: Option<String>,
    /// Promote a healthy standby when the leader fails its health check.
    pub auto_failover: bool,
    /// When false the group runs uncoordinated (every member follows its
    /// own enable logic) and no leader is designated.
    pub use_lead_lag: bool,
    /// Days between scheduled leader rotations.
    pub changeover_interval_days: f64,
    /// Epoch seconds of the last rotation (0 = never).
    #[serde(default)]
    pub last_changeover_epoch: i64,
    /// Epoch seconds of the last failover (0 = never).
    #[serde(default)]
    pub last_failover_epoch: i64,
    #[serde(default)]
    pub last_health_check_epoch: i64,
    #[serde(default)]
    pub last_rotation_check_epoch: i64,
    #[serde(default)]
    pub phase: GroupPhase,
}

impl LeadLagGroup {
    pub fn new(id: &str, member_ids: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            member_ids,
            leader_id: None,
            auto_failover: true,
            use_lead_lag: true,
            changeover_interval_days: 7.0,
            last_changeover_epoch: 0,
            last_failover_epoch: 0,
            last_health_check_epoch: 0,
            last_rotation_check_epoch: 0,
            phase: GroupPhase::NormalLeaderHealthy,
        }
    }

    /// Is this member the current leader?
    pub fn is_leader(&self, equipment_id: &str) -> bool {
        self.leader_id.as_deref() == Some(equipment_id)
    }

    /// Next member after `current` in rotation order (wrapping).
    fn next_after(&self, current: &str) -> Option<&String> {
        let idx = self.member_ids.iter().position(|m| m == current)?;
        self.member_ids.get((idx + 1) % self.member_ids.len())
    }
}

/// Health input for one member, built by the equipment task from the same
/// metric snapshot the algorithms consume.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberHealth {
    pub id: String,
    pub healthy: bool,
    /// Failure detail for the event record (e.g. "supply 172.0F over limit").
    pub detail: Option<String>,
}

impl MemberHealth {
    pub fn healthy(id: &str) -> Self {
        Self {
            id: id.to_string(),
            healthy: true,
            detail: None,
        }
    }

    pub fn failed(id: &str, detail: &str) -> Self {
        Self {
            id: id.to_string(),
            healthy: false,
            detail: Some(detail.to_string()),
        }
    }
}

/// What changed during one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeadLagEventKind {
    LeaderSeeded,
    Rotation,
    Failover,
}

/// Transition record, written to the audit store and logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadLagEvent {
    pub group_id: String,
    pub kind: LeadLagEventKind,
    pub old_leader: Option<String>,
    pub new_leader: String,
    pub reason: String,
    pub at_epoch: i64,
}

/// The coordinator's verdict for this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadLagDecision {
    /// Designated leader (`None` when `use_lead_lag` is false or the
    /// group is empty).
    pub leader_id: Option<String>,
    /// `leadLagReason` value for member command bags.
    pub reason: String,
    pub events: Vec<LeadLagEvent>,
}

/// Evaluate one group for one tick.
///
/// Pure over its inputs: the caller persists the returned group record and
/// acts on the decision. Exactly one member leads after every evaluation
/// of a non-empty group with `use_lead_lag` set, and a tick that rotates
/// never also fails over.
pub fn evaluate_group(
    group: &LeadLagGroup,
    health: &[MemberHealth],
    now_epoch: i64,
) -> (LeadLagGroup, LeadLagDecision) {
    let mut next = group.clone();
    let mut events = Vec::new();

    if !next.use_lead_lag || next.member_ids.is_empty() {
        return (
            next,
            LeadLagDecision {
                leader_id: None,
                reason: "lead-lag disabled".to_string(),
                events,
            },
        );
    }

    // Seed: a group that has never designated a leader takes the first
    // member and starts the changeover clock.
    if next.leader_id.is_none()
        || !next
            .member_ids
            .iter()
            .any(|m| Some(m) == next.leader_id.as_ref())
    {
        let first = next.member_ids[0].clone();
        events.push(LeadLagEvent {
            group_id: next.id.clone(),
            kind: LeadLagEventKind::LeaderSeeded,
            old_leader: next.leader_id.clone(),
            new_leader: first.clone(),
            reason: "initial leader designation".to_string(),
            at_epoch: now_epoch,
        });
        next.leader_id = Some(first);
        if next.last_changeover_epoch == 0 {
            next.last_changeover_epoch = now_epoch;
        }
        next.phase = GroupPhase::NormalLeaderHealthy;
    }

    let mut rotated = false;

    // Scheduled rotation, checked every 5 minutes.
    if now_epoch - next.last_rotation_check_epoch >= ROTATION_CHECK_INTERVAL_SECS {
        next.last_rotation_check_epoch = now_epoch;
        let interval_secs = (next.changeover_interval_days * 86_400.0) as i64;
        if interval_secs > 0 && now_epoch - next.last_changeover_epoch >= interval_secs {
            if let Some(current) = next.leader_id.clone() {
                if let Some(promoted) = next.next_after(&current).cloned() {
                    if promoted != current {
                        info!(
                            group = %next.id,
                            old = %current,
                            new = %promoted,
                            "Lead-lag rotation"
                        );
                        events.push(LeadLagEvent {
                            group_id: next.id.clone(),
                            kind: LeadLagEventKind::Rotation,
                            old_leader: Some(current),
                            new_leader: promoted.clone(),
                            reason: format!(
                                "scheduled changeover after {} days",
                                next.changeover_interval_days
                            ),
                            at_epoch: now_epoch,
                        });
                        next.leader_id = Some(promoted);
                        next.last_changeover_epoch = now_epoch;
                        next.phase = GroupPhase::NormalLeaderHealthy;
                        rotated = true;
                    }
                }
            }
        }
    }

    // Health-driven failover, checked every 30 seconds. Never in the same
    // tick as a rotation.
    if !rotated && now_epoch - next.last_health_check_epoch >= HEALTH_CHECK_INTERVAL_SECS {
        next.last_health_check_epoch = now_epoch;
        if next.auto_failover {
            let leader = next.leader_id.clone().unwrap_or_default();
            let leader_health = health.iter().find(|h| h.id == leader);
            let leader_failed = leader_health.map(|h| !h.healthy).unwrap_or(false);
            if leader_failed {
                let detail = leader_health
                    .and_then(|h| h.detail.clone())
                    .unwrap_or_else(|| "health check failed".to_string());
                // Promote the next healthy member in rotation order.
                let promoted = next
                    .member_ids
                    .iter()
                    .cycle()
                    .skip_while(|m| **m != leader)
                    .skip(1)
                    .take(next.member_ids.len().saturating_sub(1))
                    .find(|m| {
                        health
                            .iter()
                            .find(|h| h.id == **m)
                            .map(|h| h.healthy)
                            .unwrap_or(true)
                    })
                    .cloned();
                match promoted {
                    Some(promoted) => {
                        warn!(
                            group = %next.id,
                            old = %leader,
                            new = %promoted,
                            detail = %detail,
                            "Lead-lag failover"
                        );
                        events.push(LeadLagEvent {
                            group_id: next.id.clone(),
                            kind: LeadLagEventKind::Failover,
                            old_leader: Some(leader),
                            new_leader: promoted.clone(),
                            reason: format!("leader failed health check: {detail}"),
                            at_epoch: now_epoch,
                        });
                        next.leader_id = Some(promoted);
                        next.last_failover_epoch = now_epoch;
                        next.phase = GroupPhase::FailoverInProgress;
                    }
                    None => {
                        warn!(
                            group = %next.id,
                            leader = %leader,
                            "Leader unhealthy but no healthy standby to promote"
                        );
                        next.phase = GroupPhase::FailoverInProgress;
                    }
                }
            } else if next.phase == GroupPhase::FailoverInProgress {
                next.phase = GroupPhase::NormalLeaderHealthy;
            }
        }
    }

    let reason = match next.phase {
        GroupPhase::FailoverInProgress => "failover".to_string(),
        GroupPhase::RotationPending => "rotation pending".to_string(),
        GroupPhase::NormalLeaderHealthy => {
            if rotated {
                "scheduled changeover".to_string()
            } else {
                "normal".to_string()
            }
        }
    };

    let decision = LeadLagDecision {
        leader_id: next.leader_id.clone(),
        reason,
        events,
    };
    (next, decision)
}

/// Extreme-condition override for standby (lag) pumps: a second
/// chilled-water pump runs in extreme heat, a second hot-water pump in
/// extreme cold. Returns the override reason when active.
pub fn standby_override(kind: PumpKind, outdoor_temp: f64) -> Option<String> {
    if !outdoor_temp.is_finite() {
        return None;
    }
    match kind {
        PumpKind::ChilledWater if outdoor_temp >= CW_STANDBY_OVERRIDE_F => Some(format!(
            "outdoor {outdoor_temp:.1}F at or above {CW_STANDBY_OVERRIDE_F:.0}F"
        )),
        PumpKind::HotWater if outdoor_temp <= HW_STANDBY_OVERRIDE_F => Some(format!(
            "outdoor {outdoor_temp:.1}F at or below {HW_STANDBY_OVERRIDE_F:.0}F"
        )),
        _ => None,
    }
}
