use serde::Deserialize;

use crate::models::{EnforcementIntent, Overrides};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Upstream state authority: base URL plus one path per feed.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_containers_path")]
    pub containers_path: String,
    #[serde(default = "default_ports_path")]
    pub ports_path: String,
    #[serde(default = "default_networks_path")]
    pub networks_path: String,
    #[serde(default = "default_registry_path")]
    pub registry_path: String,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_containers_path() -> String {
    "/api/containers".into()
}

fn default_ports_path() -> String {
    "/api/ports".into()
}

fn default_networks_path() -> String {
    "/api/networks".into()
}

fn default_registry_path() -> String {
    "/api/registry".into()
}

/// Optional JSON files with category overrides and per-container enforcement opt-in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    pub overrides_path: Option<String>,
    pub enforcement_path: Option<String>,
}

impl PolicyConfig {
    /// Category overrides from `overrides_path`; empty when unset.
    pub fn load_overrides(&self) -> anyhow::Result<Overrides> {
        match &self.overrides_path {
            Some(path) => {
                let s = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading policy.overrides_path {}: {}", path, e))?;
                Ok(Overrides::from_json(&s)?)
            }
            None => Ok(Overrides::new()),
        }
    }

    /// Enforcement intent from `enforcement_path`; nothing opted in when unset.
    pub fn load_enforcement(&self) -> anyhow::Result<EnforcementIntent> {
        match &self.enforcement_path {
            Some(path) => {
                let s = std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("reading policy.enforcement_path {}: {}", path, e)
                })?;
                Ok(EnforcementIntent::from_json(&s)?)
            }
            None => Ok(EnforcementIntent::new()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// How often the background pruner applies the retention (real seconds).
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    30
}

fn default_prune_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: "data/audit.jsonl".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Live events buffered per job for WebSocket subscribers (slow clients drop the oldest).
    pub event_buffer_capacity: usize,
    /// Finished jobs are dropped from memory after this many seconds; snapshots outlive them.
    #[serde(default = "default_job_retention_secs")]
    pub retention_secs: u64,
}

fn default_job_retention_secs() -> u64 {
    3600
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            event_buffer_capacity: crate::jobs::DEFAULT_EVENT_BUFFER,
            retention_secs: default_job_retention_secs(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {}", path, e))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        let base = &self.upstream.base_url;
        anyhow::ensure!(
            base.starts_with("http://") || base.starts_with("https://"),
            "upstream.base_url must be an http(s) URL, got {:?}",
            base
        );
        anyhow::ensure!(
            self.upstream.timeout_secs > 0,
            "upstream.timeout_secs must be > 0, got {}",
            self.upstream.timeout_secs
        );
        for (key, path) in [
            ("upstream.containers_path", &self.upstream.containers_path),
            ("upstream.ports_path", &self.upstream.ports_path),
            ("upstream.networks_path", &self.upstream.networks_path),
            ("upstream.registry_path", &self.upstream.registry_path),
        ] {
            anyhow::ensure!(
                path.starts_with('/'),
                "{} must start with '/', got {:?}",
                key,
                path
            );
        }
        anyhow::ensure!(
            !self.storage.path.is_empty(),
            "storage.path must be non-empty"
        );
        anyhow::ensure!(
            self.storage.retention_days > 0,
            "storage.retention_days must be > 0, got {}",
            self.storage.retention_days
        );
        anyhow::ensure!(
            self.storage.prune_interval_secs > 0,
            "storage.prune_interval_secs must be > 0, got {}",
            self.storage.prune_interval_secs
        );
        anyhow::ensure!(!self.audit.path.is_empty(), "audit.path must be non-empty");
        anyhow::ensure!(
            self.jobs.event_buffer_capacity > 0,
            "jobs.event_buffer_capacity must be > 0, got {}",
            self.jobs.event_buffer_capacity
        );
        anyhow::ensure!(
            self.jobs.retention_secs > 0,
            "jobs.retention_secs must be > 0, got {}",
            self.jobs.retention_secs
        );
        Ok(())
    }
}
