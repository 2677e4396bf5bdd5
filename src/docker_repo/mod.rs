// Container runtime access: the operations the executor consumes, and Docker via bollard.

mod inspect;

pub use inspect::{definition_to_create_body, runtime_container_from_inspect};

use bollard::Docker;
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, RemoveContainerOptionsBuilder,
    StartContainerOptions, StopContainerOptionsBuilder,
};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use tracing::instrument;

use crate::error::ReconcileError;
use crate::models::{PortBinding, Protocol};

/// Seconds Docker waits after SIGTERM before killing on stop.
pub const STOP_GRACE_SECS: i32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartPolicySpec {
    pub name: String,
    pub maximum_retry_count: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSpec {
    pub path_on_host: String,
    pub path_in_container: String,
    pub cgroup_permissions: Option<String>,
}

/// Everything needed to recreate a container as it is now, except its ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDefinition {
    pub image: String,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Bind mounts and named volumes, in `source:destination[:ro]` form.
    pub binds: Vec<String>,
    pub working_dir: Option<String>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub user: Option<String>,
    pub restart_policy: Option<RestartPolicySpec>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub devices: Vec<DeviceSpec>,
    pub privileged: bool,
    pub sysctls: HashMap<String, String>,
    /// Primary network; the only one settable at create time.
    pub network_mode: Option<String>,
    /// Networks to reattach after create, before start.
    pub secondary_networks: Vec<String>,
    pub port_bindings: Vec<PortBinding>,
    /// Non-wildcard listen address per (container port, protocol), kept across a port change.
    pub host_ips: BTreeMap<(u16, Protocol), String>,
}

/// Live view of one container as the runtime reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContainer {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Actually published bindings, sorted and de-duplicated.
    pub published: Vec<PortBinding>,
    pub definition: ContainerDefinition,
}

/// Runtime operations consumed by the executor. Any failure is a hard error.
pub trait ContainerRuntime: Send + Sync + 'static {
    /// `Ok(None)` when no container has this name.
    fn inspect(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<RuntimeContainer>, ReconcileError>> + Send;

    fn stop(&self, id: &str) -> impl Future<Output = Result<(), ReconcileError>> + Send;

    fn remove(&self, id: &str) -> impl Future<Output = Result<(), ReconcileError>> + Send;

    /// Create a stopped container; returns its id.
    fn create(
        &self,
        name: &str,
        definition: &ContainerDefinition,
    ) -> impl Future<Output = Result<String, ReconcileError>> + Send;

    fn connect_network(
        &self,
        network: &str,
        id: &str,
    ) -> impl Future<Output = Result<(), ReconcileError>> + Send;

    fn start(&self, id: &str) -> impl Future<Output = Result<(), ReconcileError>> + Send;
}

pub struct DockerRepo {
    docker: Docker,
}

impl DockerRepo {
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_unix_defaults()?;
        Ok(Self { docker })
    }

    /// Round-trip to the daemon; used to skip Docker-dependent paths when unavailable.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.docker.ping().await?;
        Ok(())
    }
}

fn runtime_error(
    operation: &'static str,
    container: &str,
    e: bollard::errors::Error,
) -> ReconcileError {
    ReconcileError::RuntimeCommand {
        operation,
        container: container.to_string(),
        output: e.to_string(),
    }
}

impl ContainerRuntime for DockerRepo {
    #[instrument(skip(self), fields(repo = "docker", operation = "inspect"))]
    async fn inspect(&self, name: &str) -> Result<Option<RuntimeContainer>, ReconcileError> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(resp) => Ok(Some(runtime_container_from_inspect(&resp, name))),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(runtime_error("inspect", name, e)),
        }
    }

    #[instrument(skip(self), fields(repo = "docker", operation = "stop"))]
    async fn stop(&self, id: &str) -> Result<(), ReconcileError> {
        let options = StopContainerOptionsBuilder::default()
            .t(STOP_GRACE_SECS)
            .build();
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| runtime_error("stop", id, e))
    }

    #[instrument(skip(self), fields(repo = "docker", operation = "remove"))]
    async fn remove(&self, id: &str) -> Result<(), ReconcileError> {
        // Named volumes survive: v=false.
        let options = RemoveContainerOptionsBuilder::default()
            .force(false)
            .v(false)
            .build();
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| runtime_error("remove", id, e))
    }

    #[instrument(
        skip(self, definition),
        fields(
            repo = "docker",
            operation = "create",
            image = %definition.image
        )
    )]
    async fn create(
        &self,
        name: &str,
        definition: &ContainerDefinition,
    ) -> Result<String, ReconcileError> {
        let options = CreateContainerOptionsBuilder::default().name(name).build();
        let body = definition_to_create_body(definition);
        let resp = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| runtime_error("create", name, e))?;
        for warning in &resp.warnings {
            tracing::warn!(container = name, "docker create: {}", warning);
        }
        Ok(resp.id)
    }

    #[instrument(skip(self), fields(repo = "docker", operation = "connect_network"))]
    async fn connect_network(&self, network: &str, id: &str) -> Result<(), ReconcileError> {
        let request = bollard::models::NetworkConnectRequest {
            container: id.to_string(),
            ..Default::default()
        };
        self.docker
            .connect_network(network, request)
            .await
            .map_err(|e| runtime_error("connect_network", id, e))
    }

    #[instrument(skip(self), fields(repo = "docker", operation = "start"))]
    async fn start(&self, id: &str) -> Result<(), ReconcileError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| runtime_error("start", id, e))
    }
}
