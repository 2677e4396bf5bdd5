// Command-line interface (clap derive)

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::models::EnforcementIntent;
use crate::worker::GateFlags;

#[derive(Parser, Debug)]
#[command(name = crate::version::NAME, version, about = crate::version::DESCRIPTION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP + WebSocket API and the snapshot pruner.
    Serve,
    /// Fetch and print normalized upstream state.
    State,
    /// Classify every container.
    Classify,
    /// Build a plan (no side effects).
    Plan(PlanArgs),
    /// Build a fresh plan (or load one) and execute it.
    Apply(ApplyArgs),
    /// Undo the port changes of a completed job.
    Rollback(RollbackArgs),
    /// Move live ports back to a snapshot's pre-state.
    Restore(RestoreArgs),
    /// Inspect and clean up stored snapshots.
    Snapshots {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct EnforceArgs {
    /// Opt a container in to its enforceable policy (repeatable).
    #[arg(long = "enforce", value_name = "CONTAINER")]
    pub enforce: Vec<String>,
}

impl EnforceArgs {
    /// Configured intent with the command-line opt-ins added on top.
    pub fn merge_into(&self, base: &EnforcementIntent) -> EnforcementIntent {
        self.enforce
            .iter()
            .fold(base.clone(), |acc, name| acc.with(name.clone(), true))
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct GateArgs {
    /// Required for anything to run.
    #[arg(long)]
    pub apply: bool,
    /// Skip the confirmation of the action list.
    #[arg(long, short = 'y')]
    pub yes: bool,
    /// Allow recreating containers.
    #[arg(long)]
    pub allow_mutation: bool,
    /// Validate everything without stopping or recreating containers.
    #[arg(long)]
    pub dry_run: bool,
}

impl GateArgs {
    /// The downtime confirmation is always asked interactively on the command line.
    pub fn flags(&self) -> GateFlags {
        GateFlags {
            apply: self.apply,
            yes: self.yes,
            allow_mutation: self.allow_mutation,
            mutation_confirmed: false,
            dry_run: self.dry_run,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub enforce: EnforceArgs,
    /// Write the plan JSON to this file instead of stdout.
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    /// Execute this plan file instead of planning against fresh state.
    #[arg(long, value_name = "FILE", conflicts_with = "enforce")]
    pub plan_file: Option<PathBuf>,
    #[command(flatten)]
    pub enforce: EnforceArgs,
    #[command(flatten)]
    pub gates: GateArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RollbackArgs {
    pub job_id: String,
    /// Limit to these containers (repeatable).
    #[arg(long = "container", value_name = "NAME")]
    pub containers: Vec<String>,
    #[command(flatten)]
    pub gates: GateArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    pub snapshot_id: String,
    /// Limit to these containers (repeatable).
    #[arg(long = "container", value_name = "NAME")]
    pub containers: Vec<String>,
    #[command(flatten)]
    pub gates: GateArgs,
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// List snapshots, newest first.
    List,
    /// Print one snapshot.
    Show { job_id: String },
    /// Delete snapshots older than N days.
    Cleanup {
        #[arg(long, value_name = "DAYS")]
        older_than_days: u32,
    },
}

/// `None` when no containers were named, meaning "all".
pub fn selection(containers: &[String]) -> Option<Vec<String>> {
    (!containers.is_empty()).then(|| containers.to_vec())
}
