// Classification models: categories, classifier output, user overrides and enforcement intent

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ReconcileError;

/// Container category; serializes to lowercase JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    System,
    Apps,
    Games,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::System => "system",
            Category::Apps => "apps",
            Category::Games => "games",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub container: String,
    pub category: Category,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

/// User-supplied category per container name; always wins with confidence 1.0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Overrides(BTreeMap<String, Category>);

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, container: impl Into<String>, category: Category) -> Self {
        self.0.insert(container.into(), category);
        self
    }

    pub fn get(&self, container: &str) -> Option<Category> {
        self.0.get(container).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse and validate an overrides document (`{"name": "apps", ...}`).
    pub fn from_json(s: &str) -> Result<Self, ReconcileError> {
        let map: BTreeMap<String, Category> = serde_json::from_str(s)
            .map_err(|e| ReconcileError::validation(format!("overrides: {e}")))?;
        validate_names(map.keys(), "overrides")?;
        Ok(Self(map))
    }
}

impl FromIterator<(String, Category)> for Overrides {
    fn from_iter<T: IntoIterator<Item = (String, Category)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Per-container opt-in to enforceable policies, validated once at the boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnforcementIntent(BTreeMap<String, bool>);

impl EnforcementIntent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, container: impl Into<String>, enabled: bool) -> Self {
        self.0.insert(container.into(), enabled);
        self
    }

    /// Absent entries mean "not opted in".
    pub fn is_enabled(&self, container: &str) -> bool {
        self.0.get(container).copied().unwrap_or(false)
    }

    pub fn enabled_containers(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter(|(_, v)| **v).map(|(k, _)| k.as_str())
    }

    pub fn from_json(s: &str) -> Result<Self, ReconcileError> {
        let map: BTreeMap<String, bool> = serde_json::from_str(s)
            .map_err(|e| ReconcileError::validation(format!("policy enforcement: {e}")))?;
        let intent = Self(map);
        intent.validate()?;
        Ok(intent)
    }

    /// Rejects empty container names; values are already typed booleans.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        validate_names(self.0.keys(), "policy enforcement")
    }
}

impl FromIterator<(String, bool)> for EnforcementIntent {
    fn from_iter<T: IntoIterator<Item = (String, bool)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn validate_names<'a>(
    names: impl Iterator<Item = &'a String>,
    what: &str,
) -> Result<(), ReconcileError> {
    for name in names {
        if name.trim().is_empty() {
            return Err(ReconcileError::validation(format!(
                "{what}: container name must be non-empty"
            )));
        }
    }
    Ok(())
}
