// Plan builder: classification + policy + enforcement intent -> auditable action plan.
// Pure and deterministic; identical inputs give identical plans.

use std::collections::{BTreeMap, HashMap};

use crate::models::{
    ActionType, Category, Classification, Container, EffectiveClassification, EnforcementIntent,
    Overrides, Plan, PlanAction, PolicyContext, PolicyStatus, PortBinding, Protocol, State,
    canonical_ports,
};
use crate::policy::PolicyRegistry;

/// Below this confidence nothing is enforced without human review.
pub const MIN_ENFORCE_CONFIDENCE: f64 = 0.9;

pub struct PlanInput<'a> {
    pub classifications: &'a [Classification],
    pub state: &'a State,
    pub overrides: &'a Overrides,
    pub enforcement: &'a EnforcementIntent,
    pub policies: &'a PolicyRegistry,
    pub dry_run: bool,
}

/// Incremental layout result per opted-in container; `None` when the
/// sequential range ran past 65535.
pub type Layout = BTreeMap<String, Option<Vec<PortBinding>>>;

pub fn build_plan(input: &PlanInput<'_>) -> Plan {
    let by_name: HashMap<&str, &Classification> = input
        .classifications
        .iter()
        .map(|c| (c.container.as_str(), c))
        .collect();
    let effective = |name: &str| effective_classification(name, &by_name, input.overrides);

    let layout = input
        .policies
        .incremental_layout(Category::Apps)
        .and_then(|p| p.start_port)
        .map(|start| incremental_layout(input, start, &effective))
        .unwrap_or_default();

    let mut containers: Vec<_> = input.state.containers.iter().collect();
    containers.sort_by(|a, b| a.name.cmp(&b.name));

    let actions = containers
        .into_iter()
        .map(|container| {
            let eff = effective(&container.name);
            decide(input, container, eff, &layout)
        })
        .collect();

    Plan::from_actions(actions, input.dry_run)
}

pub fn effective_classification(
    name: &str,
    by_name: &HashMap<&str, &Classification>,
    overrides: &Overrides,
) -> EffectiveClassification {
    if let Some(category) = overrides.get(name) {
        return EffectiveClassification {
            category,
            confidence: 1.0,
        };
    }
    match by_name.get(name) {
        Some(c) => EffectiveClassification {
            category: c.category,
            confidence: c.confidence,
        },
        None => EffectiveClassification {
            category: Category::Unknown,
            confidence: 0.0,
        },
    }
}

/// Opted-in apps containers sorted by name share one counter starting at `start`;
/// each TCP port takes the next value, UDP ports and container ports stay as they are.
pub fn incremental_layout(
    input: &PlanInput<'_>,
    start: u16,
    effective: &dyn Fn(&str) -> EffectiveClassification,
) -> Layout {
    let mut members: Vec<_> = input
        .state
        .containers
        .iter()
        .filter(|c| input.enforcement.is_enabled(&c.name))
        .filter(|c| {
            let eff = effective(&c.name);
            eff.category == Category::Apps && eff.confidence >= MIN_ENFORCE_CONFIDENCE
        })
        .collect();
    members.sort_by(|a, b| a.name.cmp(&b.name));

    let mut counter = u32::from(start);
    let mut layout = Layout::new();
    for c in members {
        let mut exhausted = false;
        let ports: Vec<PortBinding> = c
            .ports
            .iter()
            .map(|p| {
                if p.protocol != Protocol::Tcp {
                    return *p;
                }
                let host = u16::try_from(counter).unwrap_or_else(|_| {
                    exhausted = true;
                    p.host_port
                });
                counter += 1;
                PortBinding::new(host, p.container_port, p.protocol)
            })
            .collect();
        layout.insert(c.name.clone(), (!exhausted).then_some(ports));
    }
    layout
}

fn decide(
    input: &PlanInput<'_>,
    container: &Container,
    eff: EffectiveClassification,
    layout: &Layout,
) -> PlanAction {
    let name = container.name.as_str();
    let policies = input.policies;
    let policy_id = |category: Category, fallback: &str| {
        policies
            .primary(category)
            .map(|p| p.id.clone())
            .unwrap_or_else(|| fallback.to_string())
    };
    let ctx = |id: String, status: PolicyStatus, enforceable: bool, reason: String| PolicyContext {
        id,
        status,
        enforceable,
        reason,
        confidence_used: eff.confidence,
    };

    if eff.category == Category::Unknown {
        return PlanAction::informational(
            ActionType::ManualReview,
            name,
            ctx(
                policy_id(Category::Unknown, "unknown-manual-review"),
                PolicyStatus::Blocking,
                false,
                "category unknown; classify or override before any policy applies".into(),
            ),
        );
    }

    // Games are never enforced, so their review action does not depend on confidence.
    if eff.category == Category::Games {
        return PlanAction::informational(
            ActionType::ReviewGamePorts,
            name,
            ctx(
                policy_id(Category::Games, "games-manual-review"),
                PolicyStatus::Blocking,
                false,
                "game server ports are never changed automatically".into(),
            ),
        );
    }

    if eff.confidence < MIN_ENFORCE_CONFIDENCE {
        return PlanAction::informational(
            ActionType::ManualReview,
            name,
            ctx(
                policy_id(eff.category, "low-confidence-review"),
                PolicyStatus::Blocking,
                false,
                format!(
                    "classified as {} with confidence {:.2}, below {:.2}; confirm with an override",
                    eff.category, eff.confidence, MIN_ENFORCE_CONFIDENCE
                ),
            ),
        );
    }

    match eff.category {
        Category::System => PlanAction::informational(
            ActionType::NoOp,
            name,
            ctx(
                policy_id(Category::System, "system-protected"),
                PolicyStatus::Protected,
                false,
                "system container is protected".into(),
            ),
        ),
        Category::Apps => match policies.incremental_layout(Category::Apps) {
            Some(policy) => decide_apps(container, &policy.id, layout, input.enforcement, |s, r| {
                ctx(policy.id.clone(), s, true, r)
            }),
            None => no_policy(name, ctx),
        },
        Category::Games | Category::Unknown => no_policy(name, ctx),
    }
}

fn no_policy(
    name: &str,
    ctx: impl Fn(String, PolicyStatus, bool, String) -> PolicyContext,
) -> PlanAction {
    PlanAction::informational(
        ActionType::NoOp,
        name,
        ctx(
            "none".into(),
            PolicyStatus::NoPolicy,
            false,
            "no policy applies to this category".into(),
        ),
    )
}

fn decide_apps(
    container: &Container,
    policy_id: &str,
    layout: &Layout,
    enforcement: &EnforcementIntent,
    ctx: impl Fn(PolicyStatus, String) -> PolicyContext,
) -> PlanAction {
    let name = container.name.as_str();
    if !enforcement.is_enabled(name) {
        return PlanAction::informational(
            ActionType::NoOp,
            name,
            ctx(
                PolicyStatus::EnforceableOptIn,
                format!("policy '{policy_id}' can be enforced once this container is opted in"),
            ),
        );
    }
    if !container.running {
        return PlanAction::informational(
            ActionType::NoOp,
            name,
            ctx(
                PolicyStatus::BlockedNotRunning,
                "opted in, but stopped containers are never recreated".into(),
            ),
        );
    }
    // Every opted-in running app gets a slot; only an exhausted layout leaves it without ports.
    let Some(Some(target)) = layout.get(name) else {
        let mut c = ctx(
            PolicyStatus::Blocking,
            "incremental layout ran past port 65535".into(),
        );
        c.enforceable = false;
        return PlanAction::informational(ActionType::ManualReview, name, c);
    };
    if canonical_ports(target) == canonical_ports(&container.ports) {
        return PlanAction::informational(
            ActionType::NoOp,
            name,
            ctx(
                PolicyStatus::Compliant,
                "published ports already match the incremental layout".into(),
            ),
        );
    }
    PlanAction::update_ports(
        name,
        container.ports.clone(),
        target.clone(),
        ctx(
            PolicyStatus::Enforcing,
            format!("recreate with ports laid out by '{policy_id}'"),
        ),
    )
}
