// Domain models

mod classification;
mod container;
mod job;
mod plan;
mod snapshot;

pub use classification::{Category, Classification, EnforcementIntent, Overrides};
pub use container::{
    Container, NetworkAttachment, PortBinding, PortRecord, Protocol, RegistryEntry,
    STATE_SCHEMA_VERSION, State, canonical_ports,
};
pub use job::{
    ActionOutcome, ActionResult, ExecutionEvent, ExecutionStatus, Job, JobEvent, JobKind,
    JobResult, JobStatus,
};
pub use plan::{
    ActionType, EffectiveClassification, Plan, PlanAction, PlanSummary, PolicyContext,
    PolicyStatus,
};
pub use snapshot::{PortChange, Snapshot, SnapshotMeta, SnapshotSummary};
