// Library for tests to access modules

pub mod audit;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod confirm;
pub mod docker_repo;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod models;
pub mod planner;
pub mod policy;
pub mod rollback;
pub mod routes;
pub mod snapshot_repo;
pub mod state_loader;
pub mod version;
pub mod worker;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
