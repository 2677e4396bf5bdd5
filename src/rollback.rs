// Rollback and restore plans. Pure: a port diff between two snapshots replayed as a
// forward-shaped Plan through the executor.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{
    ActionType, JobKind, Plan, PlanAction, PolicyContext, PolicyStatus, PortBinding, PortChange,
    PortRecord, Snapshot, SnapshotMeta, State,
};

pub const ROLLBACK_POLICY_ID: &str = "rollback";
pub const RESTORE_POLICY_ID: &str = "snapshot-restore";

pub struct RollbackInput<'a> {
    /// Ports before the job ran; the rollback target.
    pub pre_ports: &'a [PortRecord],
    /// Ports after the job ran; what is live now.
    pub post_ports: &'a [PortRecord],
    /// Restrict to these containers; `None` means all.
    pub selected_containers: Option<&'a [String]>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackPlan {
    /// Symmetric difference of the two port sets, one entry per changed key.
    pub changes: Vec<PortChange>,
    pub plan: Plan,
}

type PortKey<'a> = (&'a str, crate::models::Protocol, u16);

fn index(records: &[PortRecord]) -> BTreeMap<PortKey<'_>, u16> {
    records
        .iter()
        .map(|r| ((r.container.as_str(), r.protocol, r.container_port), r.host))
        .collect()
}

/// Every (container, protocol, containerPort) key whose host port differs between `from`
/// and `to`, including keys present on one side only. Sorted by key.
pub fn diff_ports(
    from: &[PortRecord],
    to: &[PortRecord],
    selected: Option<&[String]>,
) -> Vec<PortChange> {
    let from_idx = index(from);
    let to_idx = index(to);
    let keys: BTreeSet<PortKey<'_>> = from_idx.keys().chain(to_idx.keys()).copied().collect();
    keys.into_iter()
        .filter(|(container, _, _)| selected.is_none_or(|s| s.iter().any(|n| n == container)))
        .filter_map(|key| {
            let a = from_idx.get(&key).copied();
            let b = to_idx.get(&key).copied();
            (a != b).then(|| PortChange {
                container: key.0.to_string(),
                protocol: key.1,
                container_port: key.2,
                from: a,
                to: b,
            })
        })
        .collect()
}

fn bindings_for(records: &[PortRecord], container: &str) -> Vec<PortBinding> {
    let mut out: Vec<PortBinding> = records
        .iter()
        .filter(|r| r.container == container)
        .map(|r| PortBinding::new(r.host, r.container_port, r.protocol))
        .collect();
    out.sort();
    out
}

fn changed_containers(changes: &[PortChange]) -> BTreeMap<&str, usize> {
    let mut out = BTreeMap::new();
    for c in changes {
        *out.entry(c.container.as_str()).or_insert(0) += 1;
    }
    out
}

/// Plan that moves live ports (`post`) back to `pre` for the selected containers.
pub fn build_rollback_plan(input: &RollbackInput<'_>) -> RollbackPlan {
    let changes = diff_ports(input.post_ports, input.pre_ports, input.selected_containers);
    let actions = group_changes(
        &changes,
        input.pre_ports,
        input.post_ports,
        ROLLBACK_POLICY_ID,
    );
    RollbackPlan {
        plan: Plan::from_actions(actions, input.dry_run),
        changes,
    }
}

/// Restore plan toward an arbitrary snapshot's pre-state, measured against current live state.
/// Containers not running now cannot be recreated and are downgraded to informational actions.
pub fn create_restore_plan(
    snapshot: &Snapshot,
    selected: Option<&[String]>,
    current: &State,
    dry_run: bool,
) -> RollbackPlan {
    let pre = snapshot.pre_state.port_records();
    let live = current.port_records();
    let changes = diff_ports(&live, &pre, selected);
    let actions = group_changes(&changes, &pre, &live, RESTORE_POLICY_ID)
        .into_iter()
        .map(|action| {
            let running = current
                .container(&action.container)
                .is_some_and(|c| c.running);
            if running || !action.executable {
                return action;
            }
            let reason = if current.container(&action.container).is_some() {
                "container is not running; restore it manually or start it first"
            } else {
                "container no longer exists"
            };
            PlanAction::informational(
                ActionType::NoOp,
                action.container,
                PolicyContext {
                    id: RESTORE_POLICY_ID.into(),
                    status: PolicyStatus::BlockedNotRunning,
                    enforceable: false,
                    reason: reason.into(),
                    confidence_used: 1.0,
                },
            )
        })
        .collect();
    RollbackPlan {
        plan: Plan::from_actions(actions, dry_run),
        changes,
    }
}

/// Durable record of one job that changed ports: both states, the diff, and counts.
/// A failed job is recorded too when some of its actions were applied.
pub fn capture_snapshot(
    job_id: &str,
    kind: JobKind,
    completed_at: i64,
    pre_state: State,
    post_state: State,
    plan: &Plan,
    applied_count: usize,
) -> Snapshot {
    let diff = diff_ports(&pre_state.port_records(), &post_state.port_records(), None);
    let containers = plan
        .mutations()
        .map(|a| a.container.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    Snapshot {
        job_id: job_id.to_string(),
        kind,
        completed_at,
        pre_state,
        post_state,
        diff,
        meta: SnapshotMeta {
            action_count: plan.action_count,
            executable_count: plan.executable_count,
            applied_count,
            containers,
        },
    }
}

fn group_changes(
    changes: &[PortChange],
    target: &[PortRecord],
    live: &[PortRecord],
    policy_id: &str,
) -> Vec<PlanAction> {
    changed_containers(changes)
        .into_iter()
        .map(|(container, count)| {
            let from = bindings_for(live, container);
            let to = bindings_for(target, container);
            if from.is_empty() || to.is_empty() {
                // Adding or dropping every published port is not a recreate with new ports.
                return PlanAction::informational(
                    ActionType::ManualReview,
                    container,
                    PolicyContext {
                        id: policy_id.into(),
                        status: PolicyStatus::Blocking,
                        enforceable: false,
                        reason: format!(
                            "{count} port change(s) leave one side with no published ports; \
                             review manually"
                        ),
                        confidence_used: 1.0,
                    },
                );
            }
            PlanAction::update_ports(
                container,
                from,
                to,
                PolicyContext {
                    id: policy_id.into(),
                    status: PolicyStatus::Enforcing,
                    enforceable: true,
                    reason: format!("restore {count} port change(s)"),
                    confidence_used: 1.0,
                },
            )
        })
        .collect()
}
