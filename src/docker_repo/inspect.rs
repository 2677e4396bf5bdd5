// Mapping between Docker's inspect/create payloads and RuntimeContainer / ContainerDefinition.

use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, DeviceMapping, HostConfig, PortMap,
    RestartPolicy, RestartPolicyNameEnum,
};
use std::collections::{BTreeMap, HashMap};

use super::{ContainerDefinition, DeviceSpec, RestartPolicySpec, RuntimeContainer};
use crate::models::{PortBinding, Protocol, canonical_ports};

/// Parse a Docker port key ("80/tcp", "53/udp", "8080") into (container port, protocol).
fn parse_port_key(key: &str) -> Option<(u16, Protocol)> {
    let (port, proto) = match key.split_once('/') {
        Some((p, proto)) => (p, Protocol::parse(proto)?),
        None => (key, Protocol::Tcp),
    };
    let port: u16 = port.trim().parse().ok()?;
    (port != 0).then_some((port, proto))
}

/// Host bindings from a Docker port map; unpublished exposed ports are skipped.
pub(crate) fn bindings_from_port_map(ports: &PortMap) -> Vec<PortBinding> {
    let mut out = Vec::new();
    for (key, bindings) in ports {
        let Some((container_port, protocol)) = parse_port_key(key) else {
            tracing::debug!(key = %key, "skipping unparseable port key");
            continue;
        };
        for b in bindings.iter().flatten() {
            let host = b
                .host_port
                .as_deref()
                .and_then(|h| h.trim().parse::<u16>().ok())
                .filter(|h| *h != 0);
            if let Some(host_port) = host {
                out.push(PortBinding::new(host_port, container_port, protocol));
            }
        }
    }
    // IPv4 and IPv6 listeners show up as two entries for one binding.
    canonical_ports(&out)
}

/// Specific listen addresses per container port. Wildcards are left out, Docker's default.
fn host_ips_from_port_map(ports: &PortMap) -> BTreeMap<(u16, Protocol), String> {
    let mut out = BTreeMap::new();
    for (key, bindings) in ports {
        let Some(port_key) = parse_port_key(key) else {
            continue;
        };
        let specific = bindings
            .iter()
            .flatten()
            .filter_map(|b| b.host_ip.as_deref())
            .find(|ip| !matches!(*ip, "" | "0.0.0.0" | "::"));
        if let Some(ip) = specific {
            out.insert(port_key, ip.to_string());
        }
    }
    out
}

fn port_map_from_bindings(
    bindings: &[PortBinding],
    host_ips: &BTreeMap<(u16, Protocol), String>,
) -> PortMap {
    let mut map: PortMap = HashMap::new();
    for b in bindings {
        map.entry(format!("{}/{}", b.container_port, b.protocol))
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(bollard::models::PortBinding {
                host_ip: host_ips.get(&(b.container_port, b.protocol)).cloned(),
                host_port: Some(b.host_port.to_string()),
            });
    }
    map
}

fn restart_policy_name(name: &RestartPolicyNameEnum) -> Option<String> {
    serde_json::to_value(name)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .filter(|s| !s.is_empty())
}

fn restart_policy_enum(name: &str) -> Option<RestartPolicyNameEnum> {
    serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
}

/// Build a RuntimeContainer from `docker inspect`. `requested` is the name used for lookup,
/// kept when the response carries none.
pub fn runtime_container_from_inspect(
    resp: &ContainerInspectResponse,
    requested: &str,
) -> RuntimeContainer {
    let name = resp
        .name
        .as_deref()
        .map(|n| n.trim_start_matches('/').to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| requested.to_string());
    let running = resp
        .state
        .as_ref()
        .and_then(|s| s.running)
        .unwrap_or(false);
    let port_map = resp.network_settings.as_ref().and_then(|n| n.ports.as_ref());
    let published = port_map.map(bindings_from_port_map).unwrap_or_default();
    let host_ips = port_map.map(host_ips_from_port_map).unwrap_or_default();

    let config = resp.config.clone().unwrap_or_default();
    let host = resp.host_config.clone().unwrap_or_default();

    let binds = resp
        .mounts
        .iter()
        .flatten()
        .filter_map(|m| {
            let source = match m.typ.as_deref() {
                Some("bind") => m.source.clone(),
                Some("volume") => m.name.clone(),
                _ => None,
            }?;
            let dest = m.destination.clone()?;
            let ro = if m.rw == Some(false) { ":ro" } else { "" };
            Some(format!("{source}:{dest}{ro}"))
        })
        .collect();

    let network_mode = host.network_mode.clone().filter(|m| !m.is_empty());
    let primary = match network_mode.as_deref() {
        None | Some("default") => "bridge",
        Some(m) => m,
    };
    let mut secondary_networks: Vec<String> = resp
        .network_settings
        .as_ref()
        .and_then(|n| n.networks.as_ref())
        .map(|nets| nets.keys().filter(|k| *k != primary).cloned().collect())
        .unwrap_or_default();
    secondary_networks.sort();

    let definition = ContainerDefinition {
        image: config.image.clone().unwrap_or_default(),
        env: config.env.clone().unwrap_or_default(),
        labels: config.labels.clone().unwrap_or_default(),
        binds,
        working_dir: config.working_dir.clone().filter(|w| !w.is_empty()),
        entrypoint: config.entrypoint.clone(),
        cmd: config.cmd.clone(),
        user: config.user.clone().filter(|u| !u.is_empty()),
        restart_policy: host.restart_policy.as_ref().and_then(|p| {
            Some(RestartPolicySpec {
                name: restart_policy_name(p.name.as_ref()?)?,
                maximum_retry_count: p.maximum_retry_count,
            })
        }),
        cap_add: host.cap_add.clone().unwrap_or_default(),
        cap_drop: host.cap_drop.clone().unwrap_or_default(),
        devices: host
            .devices
            .iter()
            .flatten()
            .map(|d| DeviceSpec {
                path_on_host: d.path_on_host.clone().unwrap_or_default(),
                path_in_container: d.path_in_container.clone().unwrap_or_default(),
                cgroup_permissions: d.cgroup_permissions.clone(),
            })
            .collect(),
        privileged: host.privileged.unwrap_or(false),
        sysctls: host.sysctls.clone().unwrap_or_default(),
        network_mode,
        secondary_networks,
        port_bindings: published.clone(),
        host_ips,
    };

    RuntimeContainer {
        id: resp.id.clone().unwrap_or_default(),
        name,
        running,
        published,
        definition,
    }
}

fn non_empty<T>(v: &[T]) -> Option<Vec<T>>
where
    T: Clone,
{
    (!v.is_empty()).then(|| v.to_vec())
}

/// Create payload preserving everything in the definition.
pub fn definition_to_create_body(def: &ContainerDefinition) -> ContainerCreateBody {
    let host_config = HostConfig {
        binds: non_empty(&def.binds),
        restart_policy: def.restart_policy.as_ref().map(|p| RestartPolicy {
            name: restart_policy_enum(&p.name),
            maximum_retry_count: p.maximum_retry_count,
        }),
        cap_add: non_empty(&def.cap_add),
        cap_drop: non_empty(&def.cap_drop),
        devices: (!def.devices.is_empty()).then(|| {
            def.devices
                .iter()
                .map(|d| DeviceMapping {
                    path_on_host: Some(d.path_on_host.clone()),
                    path_in_container: Some(d.path_in_container.clone()),
                    cgroup_permissions: d.cgroup_permissions.clone(),
                })
                .collect()
        }),
        privileged: Some(def.privileged),
        sysctls: (!def.sysctls.is_empty()).then(|| def.sysctls.clone()),
        network_mode: def.network_mode.clone(),
        port_bindings: (!def.port_bindings.is_empty())
            .then(|| port_map_from_bindings(&def.port_bindings, &def.host_ips)),
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(def.image.clone()),
        env: non_empty(&def.env),
        labels: (!def.labels.is_empty()).then(|| def.labels.clone()),
        working_dir: def.working_dir.clone(),
        entrypoint: def.entrypoint.clone(),
        cmd: def.cmd.clone(),
        user: def.user.clone(),
        host_config: Some(host_config),
        ..Default::default()
    }
}
