//! Operational state: the persisted record the engine reads and mutates
//! under its single mutual-exclusion scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which path the managed hostname currently (or observedly) points at.
///
/// `Unknown` only ever appears as an observation — it is never stored as
/// `OperationalState::current_target` after initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsTarget {
    /// The tunnel/CNAME path.
    #[serde(rename = "tunnel")]
    Primary,
    /// The direct-address path.
    #[serde(rename = "vps")]
    Failover,
    Unknown,
}

impl std::fmt::Display for DnsTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsTarget::Primary => write!(f, "tunnel"),
            DnsTarget::Failover => write!(f, "vps"),
            DnsTarget::Unknown => write!(f, "unknown"),
        }
    }
}

/// The system's current position in the failover state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPhase {
    PrimaryHealthy,
    PrimaryDegraded,
    OnFailover,
    Recovering,
    DualFailure,
}

impl SystemPhase {
    /// Whether this phase carries a running dwell-time clock.
    pub fn is_stabilizing(self) -> bool {
        matches!(self, SystemPhase::PrimaryDegraded | SystemPhase::Recovering)
    }
}

impl std::fmt::Display for SystemPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SystemPhase::PrimaryHealthy => "primary_healthy",
            SystemPhase::PrimaryDegraded => "primary_degraded",
            SystemPhase::OnFailover => "on_failover",
            SystemPhase::Recovering => "recovering",
            SystemPhase::DualFailure => "dual_failure",
        };
        write!(f, "{s}")
    }
}

/// Persisted record mutated only by `ReconcileEngine`, under a single lock.
///
/// # Invariants
/// - `stabilization_start` is `Some` iff `phase` is `PrimaryDegraded` or `Recovering`.
/// - `current_target == Primary` while `phase` is `PrimaryHealthy`/`PrimaryDegraded`;
///   `current_target == Failover` while `phase` is `OnFailover`/`Recovering`.
///   `DualFailure` leaves `current_target` unchanged.
/// - `failover_count_24h` only increases on a successful Primary -> Failover commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalState {
    pub current_target: DnsTarget,
    pub phase: SystemPhase,
    pub last_change_time: DateTime<Utc>,
    pub failover_count_24h: u32,
    pub stabilization_start: Option<DateTime<Utc>>,
    pub last_alert_time: Option<DateTime<Utc>>,

    /// Unknown keys are preserved across load/save round-trips.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl OperationalState {
    /// The state a fresh install starts from: primary healthy, zero counters.
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            current_target: DnsTarget::Primary,
            phase: SystemPhase::PrimaryHealthy,
            last_change_time: now,
            failover_count_24h: 0,
            stabilization_start: None,
            last_alert_time: None,
            extra: serde_json::Map::new(),
        }
    }

    /// True iff the invariant tying `stabilization_start` to the current phase holds.
    pub fn stabilization_invariant_holds(&self) -> bool {
        self.stabilization_start.is_some() == self.phase.is_stabilizing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_satisfies_invariants() {
        let state = OperationalState::initial(Utc::now());
        assert_eq!(state.current_target, DnsTarget::Primary);
        assert_eq!(state.phase, SystemPhase::PrimaryHealthy);
        assert_eq!(state.failover_count_24h, 0);
        assert!(state.stabilization_invariant_holds());
    }

    #[test]
    fn target_serializes_to_wire_strings() {
        assert_eq!(serde_json::to_string(&DnsTarget::Primary).unwrap(), "\"tunnel\"");
        assert_eq!(serde_json::to_string(&DnsTarget::Failover).unwrap(), "\"vps\"");
    }

    #[test]
    fn phase_serializes_to_wire_strings() {
        assert_eq!(
            serde_json::to_string(&SystemPhase::PrimaryDegraded).unwrap(),
            "\"primary_degraded\""
        );
        assert_eq!(
            serde_json::to_string(&SystemPhase::DualFailure).unwrap(),
            "\"dual_failure\""
        );
    }

    #[test]
    fn unknown_keys_round_trip() {
        let json = serde_json::json!({
            "current_target": "tunnel",
            "phase": "primary_healthy",
            "last_change_time": "2026-01-01T00:00:00Z",
            "failover_count_24h": 0,
            "stabilization_start": null,
            "last_alert_time": null,
            "operator_note": "paged on-call twice"
        });
        let state: OperationalState = serde_json::from_value(json).unwrap();
        assert_eq!(
            state.extra.get("operator_note").and_then(|v| v.as_str()),
            Some("paged on-call twice")
        );
        let round_tripped = serde_json::to_value(&state).unwrap();
        assert_eq!(round_tripped["operator_note"], "paged on-call twice");
    }
}
