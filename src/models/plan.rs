// Plan and action models (wire shape shared by forward, rollback and restore plans)

use serde::{Deserialize, Serialize};
use std::fmt;

use super::classification::Category;
use super::container::PortBinding;

/// Action type. Unknown names are kept as `Unrecognized` so preflight can reject them
/// instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    ManualReview,
    ReviewGamePorts,
    NoOp,
    UpdateContainerPorts,
    Unrecognized(String),
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            ActionType::ManualReview => "manual-review",
            ActionType::ReviewGamePorts => "review-game-ports",
            ActionType::NoOp => "no-op",
            ActionType::UpdateContainerPorts => "update-container-ports",
            ActionType::Unrecognized(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ActionType::Unrecognized(_))
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, ActionType::UpdateContainerPorts)
    }
}

impl From<String> for ActionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "manual-review" => ActionType::ManualReview,
            "review-game-ports" => ActionType::ReviewGamePorts,
            "no-op" => ActionType::NoOp,
            "update-container-ports" => ActionType::UpdateContainerPorts,
            _ => ActionType::Unrecognized(s),
        }
    }
}

impl From<ActionType> for String {
    fn from(t: ActionType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyStatus {
    Blocking,
    Protected,
    BlockedNotRunning,
    Compliant,
    EnforceableOptIn,
    NoPolicy,
    Enforcing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyContext {
    pub id: String,
    pub status: PolicyStatus,
    pub enforceable: bool,
    pub reason: String,
    pub confidence_used: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub container: String,
    pub executable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Vec<PortBinding>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<PortBinding>>,
    pub policy_context: PolicyContext,
}

impl PlanAction {
    pub fn informational(
        action_type: ActionType,
        container: impl Into<String>,
        policy_context: PolicyContext,
    ) -> Self {
        Self {
            action_type,
            container: container.into(),
            executable: false,
            from: None,
            to: None,
            policy_context,
        }
    }

    pub fn update_ports(
        container: impl Into<String>,
        from: Vec<PortBinding>,
        to: Vec<PortBinding>,
        policy_context: PolicyContext,
    ) -> Self {
        Self {
            action_type: ActionType::UpdateContainerPorts,
            container: container.into(),
            executable: true,
            from: Some(from),
            to: Some(to),
            policy_context,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub containers: usize,
    pub mutations: usize,
    pub blocking: usize,
    pub protected: usize,
    pub informational: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub dry_run: bool,
    pub summary: PlanSummary,
    pub action_count: usize,
    pub executable_count: usize,
    pub actions: Vec<PlanAction>,
}

impl Plan {
    /// Derive counts and summary from the action list.
    pub fn from_actions(actions: Vec<PlanAction>, dry_run: bool) -> Self {
        let mut summary = PlanSummary {
            containers: actions.len(),
            ..Default::default()
        };
        for a in &actions {
            if a.action_type.is_mutation() && a.executable {
                summary.mutations += 1;
            } else {
                match a.policy_context.status {
                    PolicyStatus::Blocking => summary.blocking += 1,
                    PolicyStatus::Protected => summary.protected += 1,
                    _ => summary.informational += 1,
                }
            }
        }
        let executable_count = actions.iter().filter(|a| a.executable).count();
        Self {
            dry_run,
            summary,
            action_count: actions.len(),
            executable_count,
            actions,
        }
    }

    pub fn has_mutations(&self) -> bool {
        self.actions.iter().any(|a| a.action_type.is_mutation())
    }

    pub fn mutations(&self) -> impl Iterator<Item = &PlanAction> {
        self.actions
            .iter()
            .filter(|a| a.action_type.is_mutation() && a.executable)
    }
}

/// Effective category and confidence after applying overrides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveClassification {
    pub category: Category,
    pub confidence: f64,
}
