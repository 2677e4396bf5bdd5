// Snapshot models: persisted pre/post state of a completed job

use serde::{Deserialize, Serialize};

use super::container::{Protocol, State};
use super::job::JobKind;

/// One changed port key between two snapshots. `from`/`to` are host ports;
/// `None` means the key is absent on that side.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortChange {
    pub container: String,
    pub protocol: Protocol,
    pub container_port: u16,
    pub from: Option<u16>,
    pub to: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub action_count: usize,
    pub executable_count: usize,
    pub applied_count: usize,
    pub containers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub job_id: String,
    pub kind: JobKind,
    pub completed_at: i64,
    pub pre_state: State,
    pub post_state: State,
    /// Port changes the job made (pre → post).
    pub diff: Vec<PortChange>,
    pub meta: SnapshotMeta,
}

/// Listing row; omits the full states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub job_id: String,
    pub kind: JobKind,
    pub completed_at: i64,
    pub change_count: usize,
    pub meta: SnapshotMeta,
}
