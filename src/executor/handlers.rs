// Action handlers, keyed by action type.

use std::collections::HashSet;

use crate::docker_repo::{ContainerDefinition, ContainerRuntime};
use crate::error::ReconcileError;
use crate::models::{ActionOutcome, PlanAction, PortBinding, canonical_ports};

fn format_ports(ports: &[PortBinding]) -> String {
    let parts: Vec<String> = ports.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

/// Structural checks on a mutation action; nothing here touches the runtime.
pub(crate) fn validate_update(
    action: &PlanAction,
) -> Result<(&[PortBinding], &[PortBinding]), ReconcileError> {
    let name = action.container.as_str();
    if name.trim().is_empty() {
        return Err(ReconcileError::validation(
            "update-container-ports: container name is empty",
        ));
    }
    let from = action
        .from
        .as_deref()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| {
            ReconcileError::validation(format!(
                "update-container-ports '{name}': 'from' must be a non-empty port list"
            ))
        })?;
    let to = action
        .to
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            ReconcileError::validation(format!(
                "update-container-ports '{name}': 'to' must be a non-empty port list"
            ))
        })?;
    if let Some(bad) = from.iter().chain(to).find(|p| !p.is_valid()) {
        return Err(ReconcileError::validation(format!(
            "update-container-ports '{name}': port out of range in {bad}"
        )));
    }
    let mut seen = HashSet::new();
    for p in to {
        if !seen.insert((p.host_port, p.protocol)) {
            return Err(ReconcileError::validation(format!(
                "update-container-ports '{name}': host port {}/{} assigned twice",
                p.host_port, p.protocol
            )));
        }
    }
    Ok((from, to))
}

/// Recreate one container with new published ports. The live bindings must equal `from`
/// before anything destructive happens.
pub(crate) async fn update_container_ports<R: ContainerRuntime>(
    runtime: &R,
    action: &PlanAction,
    dry_run: bool,
) -> Result<(ActionOutcome, String), ReconcileError> {
    let (from, to) = validate_update(action)?;
    let name = action.container.as_str();

    let live = runtime
        .inspect(name)
        .await?
        .ok_or_else(|| ReconcileError::precondition(name, "container does not exist"))?;
    if !live.running {
        return Err(ReconcileError::precondition(
            name,
            "container is not running; stopped containers are never recreated",
        ));
    }
    let live_ports = canonical_ports(&live.published);
    if live_ports != canonical_ports(from) {
        return Err(ReconcileError::precondition(
            name,
            format!(
                "live ports {} differ from planned 'from' {}",
                format_ports(&live_ports),
                format_ports(&canonical_ports(from))
            ),
        ));
    }

    let target = canonical_ports(to);
    if dry_run {
        return Ok((
            ActionOutcome::Validated,
            format!("would recreate with {}", format_ports(&target)),
        ));
    }

    let definition = ContainerDefinition {
        port_bindings: target.clone(),
        ..live.definition
    };

    tracing::info!(container = name, id = %live.id, "stopping for recreate");
    runtime.stop(&live.id).await?;
    runtime.remove(&live.id).await?;
    let new_id = runtime.create(name, &definition).await?;
    for network in &definition.secondary_networks {
        runtime.connect_network(network, &new_id).await?;
    }
    runtime.start(&new_id).await?;
    tracing::info!(
        container = name,
        id = %new_id,
        ports = %format_ports(&target),
        "container recreated"
    );

    Ok((
        ActionOutcome::Applied,
        format!(
            "{} -> {}",
            format_ports(&live_ports),
            format_ports(&target)
        ),
    ))
}

/// manual-review, review-game-ports and no-op: recorded, never touch the runtime.
pub(crate) fn informational(action: &PlanAction) -> (ActionOutcome, String) {
    (
        ActionOutcome::Skipped,
        format!(
            "{}: {}",
            action.action_type, action.policy_context.reason
        ),
    )
}
