// Shared test helpers: in-memory container runtime, fake upstream feeds, fixtures
#![allow(dead_code)]

use axum::{Json, Router, extract::State as AxumState, routing::get};
use portpolicy::audit::AuditSink;
use portpolicy::config::UpstreamConfig;
use portpolicy::docker_repo::{ContainerDefinition, ContainerRuntime, RuntimeContainer};
use portpolicy::error::ReconcileError;
use portpolicy::jobs::JobRegistry;
use portpolicy::models::{
    Category, Container, EnforcementIntent, Overrides, PortBinding, Protocol, State,
    canonical_ports,
};
use portpolicy::policy::PolicyRegistry;
use portpolicy::snapshot_repo::SnapshotRepo;
use portpolicy::state_loader::StateLoader;
use portpolicy::worker::JobDeps;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Runtime double: containers live in a map, every call is recorded.
#[derive(Default)]
pub struct MockRuntime {
    containers: Mutex<BTreeMap<String, RuntimeContainer>>,
    calls: Mutex<Vec<String>>,
    /// Operation name ("stop", "create", ...) that fails when called, optionally only
    /// for one target.
    fail_on: Mutex<Option<(&'static str, Option<String>)>>,
    next_id: Mutex<u32>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(
        self,
        name: &str,
        image: &str,
        running: bool,
        ports: Vec<PortBinding>,
    ) -> Self {
        self.insert(name, image, running, ports, vec![]);
        self
    }

    pub fn insert(
        &self,
        name: &str,
        image: &str,
        running: bool,
        ports: Vec<PortBinding>,
        secondary_networks: Vec<String>,
    ) {
        let definition = ContainerDefinition {
            image: image.to_string(),
            env: vec!["TZ=UTC".into()],
            binds: vec![format!("/srv/{name}:/data")],
            network_mode: Some("bridge".into()),
            secondary_networks,
            port_bindings: ports.clone(),
            ..Default::default()
        };
        self.containers.lock().unwrap().insert(
            name.to_string(),
            RuntimeContainer {
                id: format!("id-{name}"),
                name: name.to_string(),
                running,
                published: canonical_ports(&ports),
                definition,
            },
        );
    }

    /// Change live ports behind the planner's back.
    pub fn drift(&self, name: &str, ports: Vec<PortBinding>) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(name) {
            c.published = canonical_ports(&ports);
            c.definition.port_bindings = ports;
        }
    }

    /// Publish a container port on one address instead of all interfaces.
    pub fn listen_on(&self, name: &str, container_port: u16, protocol: Protocol, ip: &str) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(name) {
            c.definition
                .host_ips
                .insert((container_port, protocol), ip.to_string());
        }
    }

    pub fn fail_on(&self, operation: &'static str) {
        *self.fail_on.lock().unwrap() = Some((operation, None));
    }

    pub fn fail_on_target(&self, operation: &'static str, target: &str) {
        *self.fail_on.lock().unwrap() = Some((operation, Some(target.to_string())));
    }

    pub fn clear_failure(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn destructive_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("inspect"))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<RuntimeContainer> {
        self.containers.lock().unwrap().get(name).cloned()
    }

    pub fn all(&self) -> Vec<RuntimeContainer> {
        self.containers.lock().unwrap().values().cloned().collect()
    }

    fn record(&self, operation: &'static str, target: &str) -> Result<(), ReconcileError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{operation} {target}"));
        let fails = match &*self.fail_on.lock().unwrap() {
            Some((op, only)) => *op == operation && only.as_deref().is_none_or(|t| t == target),
            None => false,
        };
        if fails {
            return Err(ReconcileError::RuntimeCommand {
                operation,
                container: target.to_string(),
                output: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn by_id<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut BTreeMap<String, RuntimeContainer>, String) -> T,
    ) -> Option<T> {
        let mut map = self.containers.lock().unwrap();
        let name = map.values().find(|c| c.id == id).map(|c| c.name.clone())?;
        Some(f(&mut map, name))
    }
}

impl ContainerRuntime for MockRuntime {
    async fn inspect(&self, name: &str) -> Result<Option<RuntimeContainer>, ReconcileError> {
        self.record("inspect", name)?;
        Ok(self.get(name))
    }

    async fn stop(&self, id: &str) -> Result<(), ReconcileError> {
        self.record("stop", id)?;
        self.by_id(id, |map, name| {
            if let Some(c) = map.get_mut(&name) {
                c.running = false;
            }
        });
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), ReconcileError> {
        self.record("remove", id)?;
        self.by_id(id, |map, name| map.remove(&name));
        Ok(())
    }

    async fn create(
        &self,
        name: &str,
        definition: &ContainerDefinition,
    ) -> Result<String, ReconcileError> {
        self.record("create", name)?;
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("new-{name}-{next}")
        };
        self.containers.lock().unwrap().insert(
            name.to_string(),
            RuntimeContainer {
                id: id.clone(),
                name: name.to_string(),
                running: false,
                published: canonical_ports(&definition.port_bindings),
                definition: definition.clone(),
            },
        );
        Ok(id)
    }

    async fn connect_network(&self, network: &str, id: &str) -> Result<(), ReconcileError> {
        self.record("connect_network", &format!("{network} {id}"))
    }

    async fn start(&self, id: &str) -> Result<(), ReconcileError> {
        self.record("start", id)?;
        self.by_id(id, |map, name| {
            if let Some(c) = map.get_mut(&name) {
                c.running = true;
            }
        });
        Ok(())
    }
}

/// Upstream feeds rendered from the runtime double, so a refetch sees recreated ports.
fn feeds_from(runtime: &MockRuntime) -> (Value, Value, Value, Value) {
    let all = runtime.all();
    let containers: Vec<Value> = all
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.name,
                "image": c.definition.image,
                "state": if c.running { "running" } else { "exited" },
            })
        })
        .collect();
    let ports: Vec<Value> = all
        .iter()
        .flat_map(|c| {
            c.published.iter().map(move |p| {
                json!({
                    "container": c.name,
                    "hostPort": p.host_port,
                    "containerPort": p.container_port,
                    "protocol": p.protocol.as_str(),
                })
            })
        })
        .collect();
    (
        json!({ "containers": containers }),
        json!({ "ports": ports }),
        json!({ "networks": [] }),
        json!([]),
    )
}

async fn serve_router(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

type Feed = AxumState<Arc<MockRuntime>>;

/// Serve the four feeds from a live runtime double; returns the base URL.
pub async fn spawn_upstream(runtime: Arc<MockRuntime>) -> String {
    let router = Router::new()
        .route(
            "/api/containers",
            get(|AxumState(rt): Feed| async move { Json(feeds_from(&rt).0) }),
        )
        .route(
            "/api/ports",
            get(|AxumState(rt): Feed| async move { Json(feeds_from(&rt).1) }),
        )
        .route(
            "/api/networks",
            get(|AxumState(rt): Feed| async move { Json(feeds_from(&rt).2) }),
        )
        .route(
            "/api/registry",
            get(|AxumState(rt): Feed| async move { Json(feeds_from(&rt).3) }),
        )
        .with_state(runtime);
    serve_router(router).await
}

/// Serve fixed payloads for the four feeds.
pub async fn spawn_static_upstream(
    containers: Value,
    ports: Value,
    networks: Value,
    registry: Value,
) -> String {
    fn fixed(body: Value) -> axum::routing::MethodRouter {
        get(move || {
            let body = body.clone();
            async move { Json(body) }
        })
    }
    let router = Router::new()
        .route("/api/containers", fixed(containers))
        .route("/api/ports", fixed(ports))
        .route("/api/networks", fixed(networks))
        .route("/api/registry", fixed(registry));
    serve_router(router).await
}

/// Base URL of a port nothing listens on.
pub async fn closed_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub fn upstream_config(base_url: &str) -> UpstreamConfig {
    UpstreamConfig {
        base_url: base_url.to_string(),
        timeout_secs: 5,
        containers_path: "/api/containers".into(),
        ports_path: "/api/ports".into(),
        networks_path: "/api/networks".into(),
        registry_path: "/api/registry".into(),
    }
}

pub async fn test_deps(
    runtime: Arc<MockRuntime>,
    base_url: &str,
    dir: &tempfile::TempDir,
    overrides: Overrides,
    enforcement: EnforcementIntent,
) -> JobDeps<MockRuntime> {
    let db = dir.path().join("snapshots.db");
    let snapshots = SnapshotRepo::connect(db.to_str().unwrap(), 30).await.unwrap();
    snapshots.init().await.unwrap();
    JobDeps {
        loader: Arc::new(StateLoader::new(&upstream_config(base_url)).unwrap()),
        runtime,
        registry: JobRegistry::new(16),
        snapshots: Arc::new(snapshots),
        audit: Arc::new(AuditSink::new(dir.path().join("audit.jsonl"))),
        policies: Arc::new(PolicyRegistry::builtin()),
        overrides: Arc::new(overrides),
        default_enforcement: Arc::new(enforcement),
    }
}

/// web1 (apps, opted in via override), mc-server (games), postgres (system).
pub fn home_runtime() -> MockRuntime {
    MockRuntime::new()
        .with_container("web1", "nginx:alpine", true, vec![PortBinding::tcp(8080, 80)])
        .with_container(
            "mc-server",
            "itzg/minecraft-server",
            true,
            vec![PortBinding::udp(19132, 19132)],
        )
        .with_container("postgres", "postgres:16", true, vec![PortBinding::tcp(5432, 5432)])
}

pub fn web1_overrides() -> Overrides {
    Overrides::new().with("web1", Category::Apps)
}

pub fn web1_enforced() -> EnforcementIntent {
    EnforcementIntent::new().with("web1", true)
}

pub fn container(name: &str, image: &str, running: bool, ports: Vec<PortBinding>) -> Container {
    Container {
        id: format!("id-{name}"),
        name: name.to_string(),
        image: image.to_string(),
        running,
        ports,
        networks: vec![],
    }
}

pub fn state_of(containers: Vec<Container>) -> State {
    State::new(1_700_000_000_000, containers, vec![])
}

pub fn udp(host: u16, container: u16) -> PortBinding {
    PortBinding::new(host, container, Protocol::Udp)
}

pub fn read_audit(dir: &tempfile::TempDir) -> Vec<Value> {
    let path = dir.path().join("audit.jsonl");
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}
