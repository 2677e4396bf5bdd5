// Upstream state feeds via reqwest. The four feeds are independent reads and are
// fetched concurrently; no retries.

mod normalize;

pub use normalize::{RawFeeds, build_state};

use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

use crate::config::UpstreamConfig;
use crate::error::ReconcileError;
use crate::models::State;

pub struct StateLoader {
    client: reqwest::Client,
    base_url: String,
    containers_path: String,
    ports_path: String,
    networks_path: String,
    registry_path: String,
}

impl StateLoader {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            containers_path: config.containers_path.clone(),
            ports_path: config.ports_path.clone(),
            networks_path: config.networks_path.clone(),
            registry_path: config.registry_path.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(
        skip(self),
        fields(
            loader = "upstream",
            operation = "load_state",
            base_url = %self.base_url
        )
    )]
    pub async fn load_state(&self) -> Result<State, ReconcileError> {
        let (containers, ports, networks, registry) = tokio::try_join!(
            self.fetch("containers", &self.containers_path),
            self.fetch("ports", &self.ports_path),
            self.fetch("networks", &self.networks_path),
            self.fetch("registry", &self.registry_path),
        )?;
        let raw = RawFeeds {
            containers,
            ports,
            networks,
            registry,
        };
        let state = build_state(&raw, crate::now_ms())?;
        tracing::debug!(
            containers = state.containers.len(),
            registry = state.registry.len(),
            "state loaded"
        );
        Ok(state)
    }

    async fn fetch(&self, feed: &'static str, path: &str) -> Result<Value, ReconcileError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ReconcileError::Transport {
                feed,
                reason: e.to_string(),
            })?;
        let body = response.bytes().await.map_err(|e| ReconcileError::Transport {
            feed,
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| ReconcileError::ContractViolation {
            feed,
            reason: format!("body is not JSON: {e}"),
        })
    }
}
