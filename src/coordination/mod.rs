//! Group coordination
//!
//! Lead-lag coordination for redundant equipment groups (boilers, pumps,
//! chillers): one member leads, the rest stand by, with scheduled rotation
//! and health-driven failover.

pub mod leadlag;

pub use leadlag::{
    evaluate_group, standby_override, GroupPhase, LeadLagDecision, LeadLagEvent,
    LeadLagEventKind, LeadLagGroup, MemberHealth,
};
