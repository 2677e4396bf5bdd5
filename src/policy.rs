// Static, read-only policy table per category. Configuration only; the planner
// interprets it.

use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;
use crate::models::Category;

/// First host port handed out by the incremental layout.
pub const INCREMENTAL_START_PORT: u16 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    Incremental,
    Manual,
    Protected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: String,
    pub applies_to: Category,
    pub mode: PolicyMode,
    pub enforceable: bool,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyRegistry {
    policies: Vec<Policy>,
}

impl PolicyRegistry {
    /// Build a registry; rejects a category with more than one enforceable policy.
    pub fn new(policies: Vec<Policy>) -> Result<Self, ReconcileError> {
        for p in &policies {
            let enforceable_for_category = policies
                .iter()
                .filter(|q| q.enforceable && q.applies_to == p.applies_to)
                .count();
            if enforceable_for_category > 1 {
                return Err(ReconcileError::validation(format!(
                    "category '{}' has more than one enforceable policy",
                    p.applies_to
                )));
            }
            if p.mode == PolicyMode::Incremental && p.start_port.is_none_or(|s| s == 0) {
                return Err(ReconcileError::validation(format!(
                    "incremental policy '{}' needs a start port",
                    p.id
                )));
            }
        }
        Ok(Self { policies })
    }

    pub fn builtin() -> Self {
        Self {
            policies: vec![
                Policy {
                    id: "system-protected".into(),
                    applies_to: Category::System,
                    mode: PolicyMode::Protected,
                    enforceable: false,
                    rationale: "Infrastructure containers keep their ports; changes here break \
                                dependents."
                        .into(),
                    start_port: None,
                },
                Policy {
                    id: "apps-incremental-ports".into(),
                    applies_to: Category::Apps,
                    mode: PolicyMode::Incremental,
                    enforceable: true,
                    rationale: "Application web ports are laid out sequentially from 5000 so \
                                they are predictable and collision-free."
                        .into(),
                    start_port: Some(INCREMENTAL_START_PORT),
                },
                Policy {
                    id: "games-manual-review".into(),
                    applies_to: Category::Games,
                    mode: PolicyMode::Manual,
                    enforceable: false,
                    rationale: "Game servers advertise their ports to clients; only a human \
                                should move them."
                        .into(),
                    start_port: None,
                },
                Policy {
                    id: "unknown-manual-review".into(),
                    applies_to: Category::Unknown,
                    mode: PolicyMode::Manual,
                    enforceable: false,
                    rationale: "Unclassified containers need a category before any policy \
                                applies."
                        .into(),
                    start_port: None,
                },
            ],
        }
    }

    pub fn all(&self) -> &[Policy] {
        &self.policies
    }

    pub fn get(&self, id: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.id == id)
    }

    pub fn for_category(&self, category: Category) -> impl Iterator<Item = &Policy> {
        self.policies
            .iter()
            .filter(move |p| p.applies_to == category)
    }

    /// The one enforceable policy for a category, if any.
    pub fn primary_enforceable(&self, category: Category) -> Option<&Policy> {
        self.for_category(category).find(|p| p.enforceable)
    }

    /// The enforceable incremental-layout policy for a category.
    pub fn incremental_layout(&self, category: Category) -> Option<&Policy> {
        self.primary_enforceable(category)
            .filter(|p| p.mode == PolicyMode::Incremental)
    }

    /// First policy for a category; used to label informational actions.
    pub fn primary(&self, category: Category) -> Option<&Policy> {
        self.primary_enforceable(category)
            .or_else(|| self.for_category(category).next())
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
