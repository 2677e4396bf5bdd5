// Rollback and restore plan tests

mod common;

use common::{container, state_of};
use portpolicy::models::{
    ActionOutcome, ActionResult, ActionType, ExecutionStatus, JobKind, JobResult, Plan,
    PlanAction, PolicyContext, PolicyStatus, PortBinding, PortRecord, Protocol,
};
use portpolicy::rollback::{
    RollbackInput, build_rollback_plan, capture_snapshot, create_restore_plan, diff_ports,
};
use std::collections::BTreeSet;

fn rec(container: &str, protocol: Protocol, container_port: u16, host: u16) -> PortRecord {
    PortRecord {
        container: container.into(),
        container_port,
        protocol,
        host,
    }
}

fn rollback(pre: &[PortRecord], post: &[PortRecord]) -> portpolicy::rollback::RollbackPlan {
    build_rollback_plan(&RollbackInput {
        pre_ports: pre,
        post_ports: post,
        selected_containers: None,
        dry_run: false,
    })
}

#[test]
fn c1_host_port_change_rolls_back_5000_to_8080() {
    let pre = vec![rec("c1", Protocol::Tcp, 80, 8080)];
    let post = vec![rec("c1", Protocol::Tcp, 80, 5000)];
    let out = rollback(&pre, &post);

    assert_eq!(out.changes.len(), 1);
    let change = &out.changes[0];
    assert_eq!(change.container, "c1");
    assert_eq!(change.protocol, Protocol::Tcp);
    assert_eq!(change.from, Some(5000));
    assert_eq!(change.to, Some(8080));

    assert_eq!(out.plan.actions.len(), 1);
    let a = &out.plan.actions[0];
    assert_eq!(a.action_type, ActionType::UpdateContainerPorts);
    assert_eq!(a.container, "c1");
    assert_eq!(a.from.as_deref(), Some(&[PortBinding::tcp(5000, 80)][..]));
    assert_eq!(a.to.as_deref(), Some(&[PortBinding::tcp(8080, 80)][..]));
    assert_eq!(a.policy_context.id, "rollback");
}

#[test]
fn changes_cover_exactly_the_symmetric_difference() {
    let pre = vec![
        rec("a", Protocol::Tcp, 80, 8080),
        rec("a", Protocol::Tcp, 443, 8443),
        rec("b", Protocol::Udp, 27015, 27015),
        rec("c", Protocol::Tcp, 22, 2222),
    ];
    let post = vec![
        rec("a", Protocol::Tcp, 80, 5000),
        rec("a", Protocol::Tcp, 443, 8443),
        rec("b", Protocol::Udp, 27015, 27015),
        rec("b", Protocol::Tcp, 27015, 27016),
        rec("c", Protocol::Tcp, 22, 2222),
    ];
    let out = rollback(&pre, &post);

    let changed: BTreeSet<_> = out
        .changes
        .iter()
        .map(|c| (c.container.clone(), c.protocol, c.container_port))
        .collect();
    let expected: BTreeSet<_> = [
        ("a".to_string(), Protocol::Tcp, 80),
        ("b".to_string(), Protocol::Tcp, 27015),
    ]
    .into_iter()
    .collect();
    assert_eq!(changed, expected);

    // The key only present after the job is removed by the rollback.
    let added = out.changes.iter().find(|c| c.container == "b").unwrap();
    assert_eq!((added.from, added.to), (Some(27016), None));

    // Unchanged containers get no action; one action per changed container.
    let containers: Vec<_> = out.plan.actions.iter().map(|a| a.container.as_str()).collect();
    assert_eq!(containers, vec!["a", "b"]);
    let b = &out.plan.actions[1];
    assert_eq!(
        b.from.as_deref(),
        Some(&[PortBinding::udp(27015, 27015), PortBinding::tcp(27016, 27015)][..])
    );
    assert_eq!(b.to.as_deref(), Some(&[PortBinding::udp(27015, 27015)][..]));
}

#[test]
fn identical_port_sets_give_an_empty_plan() {
    let ports = vec![rec("a", Protocol::Tcp, 80, 8080)];
    let out = rollback(&ports, &ports);
    assert!(out.changes.is_empty());
    assert!(out.plan.actions.is_empty());
    assert_eq!(out.plan.action_count, 0);
}

#[test]
fn removed_key_is_restored() {
    let pre = vec![rec("a", Protocol::Tcp, 80, 8080), rec("a", Protocol::Tcp, 443, 8443)];
    let post = vec![rec("a", Protocol::Tcp, 80, 8080)];
    let out = rollback(&pre, &post);
    assert_eq!(out.changes.len(), 1);
    assert_eq!((out.changes[0].from, out.changes[0].to), (None, Some(8443)));
    let a = &out.plan.actions[0];
    assert!(a.executable);
    assert_eq!(a.to.as_ref().map(Vec::len), Some(2));
}

#[test]
fn diff_respects_selection() {
    let pre = vec![rec("a", Protocol::Tcp, 80, 1), rec("b", Protocol::Tcp, 80, 2)];
    let post = vec![rec("a", Protocol::Tcp, 80, 3), rec("b", Protocol::Tcp, 80, 4)];
    let selected = vec!["a".to_string()];
    let d = diff_ports(&post, &pre, Some(&selected));
    assert_eq!(d.len(), 1);
    assert_eq!(d[0].container, "a");
}

fn applied_plan() -> (Plan, JobResult) {
    let action = PlanAction::update_ports(
        "web1",
        vec![PortBinding::tcp(8080, 80)],
        vec![PortBinding::tcp(5000, 80)],
        PolicyContext {
            id: "apps-incremental-ports".into(),
            status: PolicyStatus::Enforcing,
            enforceable: true,
            reason: String::new(),
            confidence_used: 1.0,
        },
    );
    let plan = Plan::from_actions(vec![action], false);
    let result = JobResult {
        status: ExecutionStatus::Completed,
        dry_run: false,
        results: vec![ActionResult {
            index: 0,
            action_type: ActionType::UpdateContainerPorts,
            container: "web1".into(),
            outcome: ActionOutcome::Applied,
            detail: None,
        }],
    };
    (plan, result)
}

#[test]
fn capture_snapshot_records_diff_and_meta() {
    let pre = state_of(vec![container("web1", "nginx", true, vec![PortBinding::tcp(8080, 80)])]);
    let post = state_of(vec![container("web1", "nginx", true, vec![PortBinding::tcp(5000, 80)])]);
    let (plan, result) = applied_plan();
    let applied = result.applied_count();
    let snap = capture_snapshot("job-1", JobKind::Execution, 42, pre, post, &plan, applied);
    assert_eq!(snap.job_id, "job-1");
    assert_eq!(snap.completed_at, 42);
    assert_eq!(snap.diff.len(), 1);
    assert_eq!((snap.diff[0].from, snap.diff[0].to), (Some(8080), Some(5000)));
    assert_eq!(snap.meta.action_count, 1);
    assert_eq!(snap.meta.executable_count, 1);
    assert_eq!(snap.meta.applied_count, 1);
    assert_eq!(snap.meta.containers, vec!["web1".to_string()]);
}

#[test]
fn restore_targets_an_older_snapshot_against_live_state() {
    // Snapshot from a job that moved web1 8080 -> 5000; web1 has since moved again to 6000.
    let pre = state_of(vec![
        container("web1", "nginx", true, vec![PortBinding::tcp(8080, 80)]),
        container("web2", "nginx", true, vec![PortBinding::tcp(8081, 80)]),
    ]);
    let post = state_of(vec![
        container("web1", "nginx", true, vec![PortBinding::tcp(5000, 80)]),
        container("web2", "nginx", true, vec![PortBinding::tcp(5001, 80)]),
    ]);
    let (plan, result) = applied_plan();
    let applied = result.applied_count();
    let snapshot = capture_snapshot("old", JobKind::Execution, 1, pre, post, &plan, applied);

    let live = state_of(vec![
        container("web1", "nginx", true, vec![PortBinding::tcp(6000, 80)]),
        container("web2", "nginx", false, vec![PortBinding::tcp(5001, 80)]),
    ]);
    let restore = create_restore_plan(&snapshot, None, &live, false);

    assert_eq!(restore.changes.len(), 2);
    let web1 = restore.plan.actions.iter().find(|a| a.container == "web1").unwrap();
    assert!(web1.executable);
    assert_eq!(web1.from.as_deref(), Some(&[PortBinding::tcp(6000, 80)][..]));
    assert_eq!(web1.to.as_deref(), Some(&[PortBinding::tcp(8080, 80)][..]));
    assert_eq!(web1.policy_context.id, "snapshot-restore");

    // Stopped containers are never recreated.
    let web2 = restore.plan.actions.iter().find(|a| a.container == "web2").unwrap();
    assert!(!web2.executable);
    assert_eq!(web2.policy_context.status, PolicyStatus::BlockedNotRunning);
    assert_eq!(restore.plan.mutations().count(), 1);
}

#[test]
fn restore_with_selection_and_missing_container() {
    let pre = state_of(vec![
        container("gone", "nginx", true, vec![PortBinding::tcp(8080, 80)]),
        container("web1", "nginx", true, vec![PortBinding::tcp(8081, 80)]),
    ]);
    let post = pre.clone();
    let (plan, result) = applied_plan();
    let applied = result.applied_count();
    let snapshot = capture_snapshot("s", JobKind::Execution, 1, pre, post, &plan, applied);
    let live = state_of(vec![container("web1", "nginx", true, vec![PortBinding::tcp(5000, 80)])]);

    let only_web1 = vec!["web1".to_string()];
    let restore = create_restore_plan(&snapshot, Some(&only_web1), &live, true);
    assert_eq!(restore.plan.actions.len(), 1);
    assert_eq!(restore.plan.actions[0].container, "web1");
    assert!(restore.plan.dry_run);

    let all = create_restore_plan(&snapshot, None, &live, true);
    let gone = all.plan.actions.iter().find(|a| a.container == "gone").unwrap();
    assert!(!gone.executable);
}
