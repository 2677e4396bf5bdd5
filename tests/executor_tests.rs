// Executor tests: consent gates, live-port guard, recreate sequence, observers, audit

mod common;

use common::{MockRuntime, read_audit};
use portpolicy::audit::AuditSink;
use portpolicy::confirm::{NonInteractive, ScriptedConfirmer};
use portpolicy::error::{Gate, ReconcileError};
use portpolicy::executor::{
    ExecutionContext, ExecutionObserver, ExecutorOptions, PlanSource, preflight, run_executor,
};
use portpolicy::models::{
    ActionOutcome, ActionType, ExecutionEvent, ExecutionStatus, JobResult, Plan, PlanAction,
    PolicyContext, PolicyStatus, PortBinding, Protocol,
};
use std::sync::Mutex;

fn ctx_for(id: &str, status: PolicyStatus) -> PolicyContext {
    PolicyContext {
        id: id.into(),
        status,
        enforceable: status == PolicyStatus::Enforcing,
        reason: "test".into(),
        confidence_used: 1.0,
    }
}

fn web1_update() -> PlanAction {
    PlanAction::update_ports(
        "web1",
        vec![PortBinding::tcp(8080, 80)],
        vec![PortBinding::tcp(5000, 80)],
        ctx_for("apps-incremental-ports", PolicyStatus::Enforcing),
    )
}

fn mutation_plan() -> Plan {
    Plan::from_actions(
        vec![
            PlanAction::informational(
                ActionType::ReviewGamePorts,
                "mc",
                ctx_for("games-manual-review", PolicyStatus::Blocking),
            ),
            web1_update(),
        ],
        false,
    )
}

fn runtime() -> MockRuntime {
    let rt = MockRuntime::new();
    rt.insert(
        "web1",
        "nginx:alpine",
        true,
        vec![PortBinding::tcp(8080, 80)],
        vec!["backend".into(), "monitoring".into()],
    );
    rt
}

fn all_gates(plan: Plan) -> ExecutorOptions {
    ExecutorOptions {
        plan: PlanSource::Inline(plan),
        apply: true,
        yes: true,
        allow_mutation: true,
        mutation_confirmed: true,
        dry_run: false,
    }
}

async fn run(
    rt: &MockRuntime,
    confirmer: &ScriptedConfirmer,
    options: ExecutorOptions,
) -> Result<JobResult, ReconcileError> {
    run_executor(
        options,
        &ExecutionContext {
            runtime: rt,
            confirmer,
            observer: None,
            audit: None,
            job_id: None,
        },
    )
    .await
}

#[derive(Default)]
struct Recorder(Mutex<Vec<ExecutionEvent>>);

impl ExecutionObserver for Recorder {
    fn notify(&self, event: &ExecutionEvent) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

impl Recorder {
    fn kinds(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|e| serde_json::to_value(e).unwrap()["type"].as_str().unwrap().to_string())
            .collect()
    }
}

struct Panicking;

impl ExecutionObserver for Panicking {
    fn notify(&self, _event: &ExecutionEvent) -> anyhow::Result<()> {
        panic!("observer bug");
    }
}

struct Failing;

impl ExecutionObserver for Failing {
    fn notify(&self, _event: &ExecutionEvent) -> anyhow::Result<()> {
        anyhow::bail!("observer unavailable")
    }
}

#[tokio::test]
async fn missing_apply_flag_is_denied_before_anything_else() {
    let rt = runtime();
    let confirmer = ScriptedConfirmer::answering(true);
    let mut options = all_gates(mutation_plan());
    options.apply = false;
    let err = run(&rt, &confirmer, options).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::GateDenied {
            gate: Gate::ApplyFlag,
            ..
        }
    ));
    assert!(err.to_string().contains("apply flag"));
    assert!(rt.calls().is_empty());
    assert!(confirmer.asked().is_empty());
}

#[tokio::test]
async fn declined_confirmation_aborts_cleanly() {
    let rt = runtime();
    let confirmer = ScriptedConfirmer::new(false, true);
    let mut options = all_gates(mutation_plan());
    options.yes = false;
    let err = run(&rt, &confirmer, options).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::UserAborted {
            gate: Gate::Confirmation
        }
    ));
    assert!(err.is_abort());
    assert_eq!(confirmer.asked(), vec![Gate::Confirmation]);
    assert!(rt.calls().is_empty());
}

#[tokio::test]
async fn mutation_without_allow_flag_names_the_gate() {
    let rt = runtime();
    let confirmer = ScriptedConfirmer::answering(true);
    let mut options = all_gates(mutation_plan());
    options.allow_mutation = false;
    let err = run(&rt, &confirmer, options).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::GateDenied {
            gate: Gate::AllowMutation,
            ..
        }
    ));
    assert!(err.to_string().contains("allow-mutation"));
    assert!(err.to_string().contains("1 container(s)"));
    assert!(rt.calls().is_empty());
}

#[tokio::test]
async fn mutation_confirmation_is_asked_separately() {
    let rt = runtime();
    let confirmer = ScriptedConfirmer::new(true, false);
    let mut options = all_gates(mutation_plan());
    options.yes = false;
    options.mutation_confirmed = false;
    let err = run(&rt, &confirmer, options).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::UserAborted {
            gate: Gate::MutationConfirmation
        }
    ));
    assert_eq!(
        confirmer.asked(),
        vec![Gate::Confirmation, Gate::MutationConfirmation]
    );
    assert!(rt.calls().is_empty());
}

#[tokio::test]
async fn non_interactive_confirmer_denies_with_detail() {
    let rt = runtime();
    let mut options = all_gates(mutation_plan());
    options.mutation_confirmed = false;
    let err = run_executor(
        options,
        &ExecutionContext {
            runtime: &rt,
            confirmer: &NonInteractive,
            observer: None,
            audit: None,
            job_id: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::GateDenied {
            gate: Gate::MutationConfirmation,
            ..
        }
    ));
    assert!(err.to_string().contains("no interactive terminal"));
}

#[tokio::test]
async fn informational_only_plan_needs_no_mutation_gates() {
    let rt = runtime();
    let confirmer = ScriptedConfirmer::answering(true);
    let plan = Plan::from_actions(
        vec![PlanAction::informational(
            ActionType::NoOp,
            "postgres",
            ctx_for("system-protected", PolicyStatus::Protected),
        )],
        false,
    );
    let options = ExecutorOptions {
        plan: PlanSource::Inline(plan),
        apply: true,
        yes: false,
        allow_mutation: false,
        mutation_confirmed: false,
        dry_run: false,
    };
    let result = run(&rt, &confirmer, options).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.results[0].outcome, ActionOutcome::Skipped);
    assert_eq!(confirmer.asked(), vec![Gate::Confirmation]);
    assert!(rt.calls().is_empty());
}

#[tokio::test]
async fn unknown_action_type_fails_preflight_before_any_gate_prompt() {
    let rt = runtime();
    let confirmer = ScriptedConfirmer::answering(true);
    let mut plan = mutation_plan();
    plan.actions.push(PlanAction::informational(
        ActionType::from("reserve-port".to_string()),
        "web1",
        ctx_for("x", PolicyStatus::NoPolicy),
    ));
    plan.action_count = plan.actions.len();
    assert!(preflight(&plan).is_err());

    let mut options = all_gates(plan);
    options.yes = false;
    let err = run(&rt, &confirmer, options).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Validation(_)));
    assert!(err.to_string().contains("reserve-port"));
    assert!(confirmer.asked().is_empty());
    assert!(rt.calls().is_empty());
}

#[tokio::test]
async fn malformed_mutation_fails_preflight() {
    let mut bad = web1_update();
    bad.to = Some(vec![PortBinding::tcp(5000, 80), PortBinding::tcp(5000, 81)]);
    let plan = Plan::from_actions(vec![bad], false);
    let err = preflight(&plan).unwrap_err();
    assert!(err.to_string().contains("assigned twice"));

    let mut empty = web1_update();
    empty.from = Some(vec![]);
    let plan = Plan::from_actions(vec![empty], false);
    assert!(matches!(preflight(&plan), Err(ReconcileError::Validation(_))));
}

#[tokio::test]
async fn drifted_live_ports_abort_before_any_destructive_call() {
    let rt = runtime();
    rt.drift("web1", vec![PortBinding::tcp(8080, 80), PortBinding::tcp(9090, 90)]);
    let confirmer = ScriptedConfirmer::answering(true);
    let err = run(&rt, &confirmer, all_gates(mutation_plan()))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::PreconditionFailed { .. }));
    assert!(err.to_string().contains("differ from planned"));
    assert!(rt.destructive_calls().is_empty());
    assert_eq!(rt.calls(), vec!["inspect web1".to_string()]);
}

#[tokio::test]
async fn stopped_or_missing_container_is_never_mutated() {
    let rt = MockRuntime::new().with_container(
        "web1",
        "nginx",
        false,
        vec![PortBinding::tcp(8080, 80)],
    );
    let confirmer = ScriptedConfirmer::answering(true);
    let err = run(&rt, &confirmer, all_gates(mutation_plan()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not running"));
    assert!(rt.destructive_calls().is_empty());

    let empty = MockRuntime::new();
    let err = run(&empty, &confirmer, all_gates(mutation_plan()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not exist"));
    assert!(empty.destructive_calls().is_empty());
}

#[tokio::test]
async fn recreate_runs_stop_remove_create_connect_start_in_order() {
    let rt = runtime();
    let confirmer = ScriptedConfirmer::answering(true);
    let result = run(&rt, &confirmer, all_gates(mutation_plan()))
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.applied_count(), 1);
    assert_eq!(result.results[0].outcome, ActionOutcome::Skipped);
    assert_eq!(result.results[1].outcome, ActionOutcome::Applied);

    assert_eq!(
        rt.destructive_calls(),
        vec![
            "stop id-web1".to_string(),
            "remove id-web1".to_string(),
            "create web1".to_string(),
            "connect_network backend new-web1-1".to_string(),
            "connect_network monitoring new-web1-1".to_string(),
            "start new-web1-1".to_string(),
        ]
    );

    let recreated = rt.get("web1").unwrap();
    assert!(recreated.running);
    assert_eq!(recreated.published, vec![PortBinding::tcp(5000, 80)]);
    // Everything but the ports carries over.
    assert_eq!(recreated.definition.env, vec!["TZ=UTC".to_string()]);
    assert_eq!(recreated.definition.binds, vec!["/srv/web1:/data".to_string()]);
    assert_eq!(recreated.definition.network_mode.as_deref(), Some("bridge"));
    assert_eq!(recreated.definition.image, "nginx:alpine");
}

#[tokio::test]
async fn recreate_keeps_the_listen_address_of_a_moved_port() {
    let rt = runtime();
    rt.listen_on("web1", 80, Protocol::Tcp, "127.0.0.1");
    let confirmer = ScriptedConfirmer::answering(true);
    run(&rt, &confirmer, all_gates(mutation_plan()))
        .await
        .unwrap();
    let recreated = rt.get("web1").unwrap();
    assert_eq!(recreated.published, vec![PortBinding::tcp(5000, 80)]);
    assert_eq!(
        recreated.definition.host_ips.get(&(80, Protocol::Tcp)).map(String::as_str),
        Some("127.0.0.1")
    );
}

#[tokio::test]
async fn dry_run_validates_without_destructive_calls() {
    let rt = runtime();
    let confirmer = ScriptedConfirmer::answering(true);
    let options = ExecutorOptions {
        plan: PlanSource::Inline(mutation_plan()),
        apply: true,
        yes: true,
        allow_mutation: false,
        mutation_confirmed: false,
        dry_run: true,
    };
    let result = run(&rt, &confirmer, options).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Validated);
    assert!(result.dry_run);
    assert_eq!(result.results[1].outcome, ActionOutcome::Validated);
    assert!(rt.destructive_calls().is_empty());
    assert!(confirmer.asked().is_empty());
}

#[tokio::test]
async fn first_failure_stops_the_remaining_actions() {
    let rt = runtime();
    rt.insert("web2", "nginx", true, vec![PortBinding::tcp(8081, 80)], vec![]);
    rt.fail_on("create");
    let plan = Plan::from_actions(
        vec![
            web1_update(),
            PlanAction::update_ports(
                "web2",
                vec![PortBinding::tcp(8081, 80)],
                vec![PortBinding::tcp(5001, 80)],
                ctx_for("apps-incremental-ports", PolicyStatus::Enforcing),
            ),
        ],
        false,
    );
    let recorder = Recorder::default();
    let confirmer = ScriptedConfirmer::answering(true);
    let err = run_executor(
        all_gates(plan),
        &ExecutionContext {
            runtime: &rt,
            confirmer: &confirmer,
            observer: Some(&recorder),
            audit: None,
            job_id: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::RuntimeCommand {
            operation: "create",
            ..
        }
    ));
    // No undo and nothing touches web2.
    assert!(!rt.calls().iter().any(|c| c.contains("web2")));
    assert!(rt.get("web1").is_none());
    assert_eq!(
        recorder.kinds(),
        vec!["job:start", "action:start", "action:error", "job:failed"]
    );
}

#[tokio::test]
async fn observer_sees_the_full_event_sequence() {
    let rt = runtime();
    let recorder = Recorder::default();
    let confirmer = ScriptedConfirmer::answering(true);
    run_executor(
        all_gates(mutation_plan()),
        &ExecutionContext {
            runtime: &rt,
            confirmer: &confirmer,
            observer: Some(&recorder),
            audit: None,
            job_id: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(
        recorder.kinds(),
        vec![
            "job:start",
            "action:start",
            "action:success",
            "action:start",
            "action:success",
            "job:complete",
        ]
    );
}

#[tokio::test]
async fn observer_failures_never_reach_execution() {
    let confirmer = ScriptedConfirmer::answering(true);
    for observer in [&Panicking as &dyn ExecutionObserver, &Failing] {
        let rt = runtime();
        let result = run_executor(
            all_gates(mutation_plan()),
            &ExecutionContext {
                runtime: &rt,
                confirmer: &confirmer,
                observer: Some(observer),
                audit: None,
                job_id: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(result.applied_count(), 1);
    }
}

#[tokio::test]
async fn every_run_writes_exactly_one_audit_line() {
    let dir = tempfile::TempDir::new().unwrap();
    let audit = AuditSink::new(dir.path().join("audit.jsonl"));
    let confirmer = ScriptedConfirmer::answering(true);
    let rt = runtime();

    let ctx = ExecutionContext {
        runtime: &rt,
        confirmer: &confirmer,
        observer: None,
        audit: Some(&audit),
        job_id: Some("job-42"),
    };
    let mut denied = all_gates(mutation_plan());
    denied.apply = false;
    assert!(run_executor(denied, &ctx).await.is_err());
    let mut dry = all_gates(mutation_plan());
    dry.dry_run = true;
    run_executor(dry, &ctx).await.unwrap();
    run_executor(all_gates(mutation_plan()), &ctx).await.unwrap();

    let lines = read_audit(&dir);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["status"], "denied");
    assert_eq!(lines[0]["errorKind"], "gate_denied");
    assert_eq!(lines[1]["status"], "validated");
    assert_eq!(lines[1]["dryRun"], true);
    assert_eq!(lines[2]["status"], "completed");
    assert_eq!(lines[2]["jobId"], "job-42");
    assert_eq!(lines[2]["actions"].as_array().unwrap().len(), 2);
    assert_eq!(lines[2]["results"][1]["outcome"], "applied");
}

#[tokio::test]
async fn plan_file_is_loaded_and_checked() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("plan.json");
    std::fs::write(&path, serde_json::to_string(&mutation_plan()).unwrap()).unwrap();
    let rt = runtime();
    let confirmer = ScriptedConfirmer::answering(true);
    let mut options = all_gates(mutation_plan());
    options.plan = PlanSource::File(path.clone());
    let result = run(&rt, &confirmer, options).await.unwrap();
    assert_eq!(result.applied_count(), 1);

    std::fs::write(&path, "{ not json").unwrap();
    let mut options = all_gates(mutation_plan());
    options.plan = PlanSource::File(path.clone());
    let err = run(&runtime(), &confirmer, options).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Validation(_)));

    let mut lying = serde_json::to_value(mutation_plan()).unwrap();
    lying["actionCount"] = 5.into();
    std::fs::write(&path, lying.to_string()).unwrap();
    let mut options = all_gates(mutation_plan());
    options.plan = PlanSource::File(path);
    let err = run(&runtime(), &confirmer, options).await.unwrap_err();
    assert!(err.to_string().contains("declares 5 actions"));
}
