// Normalization of raw upstream feeds into the strict `State` schema.
// Field names vary between upstream versions; everything is mapped onto canonical
// numeric ports, explicit protocols and guaranteed (possibly empty) arrays here.

use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::ReconcileError;
use crate::models::{
    Container, NetworkAttachment, PortBinding, Protocol, RegistryEntry, State, canonical_ports,
};

const CONTAINER_REF_KEYS: &[&str] = &[
    "container",
    "containerName",
    "container_name",
    "containerId",
    "container_id",
];

/// Raw feed payloads as returned by the upstream authority.
pub struct RawFeeds {
    pub containers: Value,
    pub ports: Value,
    pub networks: Value,
    pub registry: Value,
}

pub fn build_state(raw: &RawFeeds, fetched_at: i64) -> Result<State, ReconcileError> {
    let container_items = require_array("containers", &raw.containers, "containers")?;
    let port_items = require_array("ports", &raw.ports, "ports")?;
    let network_items = require_array("networks", &raw.networks, "networks")?;
    let registry_items = registry_items(&raw.registry)?;

    let mut containers: Vec<Container> = Vec::with_capacity(container_items.len());
    for item in container_items {
        let Some(obj) = item.as_object() else {
            warn!(feed = "containers", "skipping non-object container entry");
            continue;
        };
        match parse_container(obj) {
            Some(c) => {
                if containers.iter().any(|existing| existing.name == c.name) {
                    warn!(container = %c.name, "duplicate container name in feed; keeping first");
                    continue;
                }
                containers.push(c);
            }
            None => warn!(feed = "containers", "skipping container entry without name or id"),
        }
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, c) in containers.iter().enumerate() {
        index.insert(c.name.clone(), i);
        if !c.id.is_empty() {
            index.entry(c.id.clone()).or_insert(i);
        }
    }

    for item in port_items {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let Some(binding) = parse_port(obj) else {
            continue;
        };
        match str_field(obj, CONTAINER_REF_KEYS)
            .or_else(|| str_field(obj, &["name"]))
            .and_then(|r| index.get(clean_name(&r).as_str()).copied())
        {
            Some(i) => containers[i].ports.push(binding),
            None => debug!(port = %binding, "port entry does not match any container"),
        }
    }

    for item in network_items {
        let Some(obj) = item.as_object() else {
            continue;
        };
        let Some(attachment) = parse_network(obj) else {
            continue;
        };
        match str_field(obj, CONTAINER_REF_KEYS)
            .and_then(|r| index.get(clean_name(&r).as_str()).copied())
        {
            Some(i) => {
                if !containers[i].networks.iter().any(|n| n.name == attachment.name) {
                    containers[i].networks.push(attachment);
                }
            }
            None => debug!(
                network = %attachment.name,
                "network entry does not match any container"
            ),
        }
    }

    for c in &mut containers {
        c.ports = canonical_ports(&c.ports);
        c.networks.sort_by(|a, b| a.name.cmp(&b.name));
    }
    containers.sort_by(|a, b| a.name.cmp(&b.name));

    let registry = registry_items
        .iter()
        .filter_map(|item| item.as_object().and_then(parse_registry_entry))
        .collect();

    Ok(State::new(fetched_at, containers, registry))
}

fn require_array<'a>(
    feed: &'static str,
    value: &'a Value,
    key: &str,
) -> Result<&'a Vec<Value>, ReconcileError> {
    value
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ReconcileError::ContractViolation {
            feed,
            reason: format!("expected `{key}` to be an array"),
        })
}

/// Compatibility shim: the registry feed is either an array or an envelope object.
/// The `registry` field wins; otherwise the first array-valued field is used.
fn registry_items(value: &Value) -> Result<&Vec<Value>, ReconcileError> {
    let found = match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => map
            .get("registry")
            .and_then(Value::as_array)
            .or_else(|| map.values().find_map(Value::as_array)),
        _ => None,
    };
    found.ok_or_else(|| ReconcileError::ContractViolation {
        feed: "registry",
        reason: "expected an array or an object holding an array".into(),
    })
}

fn parse_container(obj: &Map<String, Value>) -> Option<Container> {
    let id = str_field(obj, &["id", "Id", "ID", "containerId"]).unwrap_or_default();
    let name = str_field(obj, &["name", "Name", "containerName"])
        .or_else(|| {
            obj.get("Names")
                .and_then(Value::as_array)
                .and_then(|names| names.first())
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .map(|n| clean_name(&n))
        .filter(|n| !n.is_empty())
        .or_else(|| (!id.is_empty()).then(|| id.clone()))?;
    let image = str_field(obj, &["image", "Image"]).unwrap_or_default();

    let ports = ["ports", "Ports"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_array))
        .map(|items| {
            items
                .iter()
                .filter_map(|p| p.as_object().and_then(parse_port))
                .collect()
        })
        .unwrap_or_default();

    let networks = match ["networks", "Networks"].iter().find_map(|k| obj.get(*k)) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|n| n.as_object().and_then(parse_network))
            .collect(),
        // Docker-style map: { "<network>": { "IPAddress": .., "Gateway": .. } }
        Some(Value::Object(map)) => map
            .iter()
            .map(|(net, detail)| {
                let detail = detail.as_object();
                NetworkAttachment {
                    name: net.clone(),
                    ip: detail
                        .and_then(|d| str_field(d, &["ip", "ipAddress", "IPAddress"]))
                        .unwrap_or_default(),
                    gateway: detail
                        .and_then(|d| str_field(d, &["gateway", "Gateway"]))
                        .unwrap_or_default(),
                }
            })
            .collect(),
        _ => Vec::new(),
    };

    Some(Container {
        id,
        name,
        image,
        running: parse_running(obj),
        ports,
        networks,
    })
}

fn parse_running(obj: &Map<String, Value>) -> bool {
    if let Some(b) = obj.get("running").and_then(Value::as_bool) {
        return b;
    }
    if let Some(state) = str_field(obj, &["state", "State"]) {
        return state.eq_ignore_ascii_case("running");
    }
    if let Some(status) = str_field(obj, &["status", "Status"]) {
        let s = status.trim().to_lowercase();
        return s == "running" || s.starts_with("up");
    }
    false
}

/// Port entry → binding. Ports may be numbers, numeric strings or "80/udp".
/// A missing protocol defaults to tcp; an unrecognized one drops the entry.
fn parse_port(obj: &Map<String, Value>) -> Option<PortBinding> {
    let host = field(
        obj,
        &["hostPort", "host_port", "PublicPort", "publicPort", "host"],
    );
    let container = field(
        obj,
        &[
            "containerPort",
            "container_port",
            "PrivatePort",
            "privatePort",
            "target",
        ],
    );
    let (host_port, _) = port_value(host?)?;
    let (container_port, suffix) = port_value(container?)?;

    let protocol = match str_field(obj, &["protocol", "Type", "type", "proto"]).or(suffix) {
        Some(label) => match Protocol::parse(&label) {
            Some(p) => p,
            None => {
                warn!(protocol = %label, "dropping port with unknown protocol");
                return None;
            }
        },
        None => Protocol::Tcp,
    };

    let binding = PortBinding::new(host_port, container_port, protocol);
    if !binding.is_valid() {
        warn!(port = %binding, "dropping port outside 1-65535");
        return None;
    }
    Some(binding)
}

/// Numeric port plus an optional "/proto" suffix when given as a string.
fn port_value(v: &Value) -> Option<(u16, Option<String>)> {
    match v {
        Value::Number(n) => {
            let n = n.as_u64()?;
            u16::try_from(n).ok().map(|p| (p, None))
        }
        Value::String(s) => {
            let (num, proto) = match s.split_once('/') {
                Some((num, proto)) => (num, Some(proto.to_string())),
                None => (s.as_str(), None),
            };
            num.trim().parse::<u16>().ok().map(|p| (p, proto))
        }
        _ => None,
    }
}

fn parse_network(obj: &Map<String, Value>) -> Option<NetworkAttachment> {
    let name = str_field(obj, &["name", "network", "Name", "NetworkName"])?;
    Some(NetworkAttachment {
        name,
        ip: str_field(obj, &["ip", "ipAddress", "IPAddress", "ip_address"]).unwrap_or_default(),
        gateway: str_field(obj, &["gateway", "Gateway"]).unwrap_or_default(),
    })
}

fn parse_registry_entry(obj: &Map<String, Value>) -> Option<RegistryEntry> {
    let Some(name) = str_field(obj, &["name", "service", "id", "key"]) else {
        warn!(feed = "registry", "skipping registry entry without a name");
        return None;
    };
    let host_port = field(obj, &["hostPort", "host_port", "port", "host"])
        .and_then(port_value)
        .map(|(p, _)| p)
        .filter(|p| *p != 0);
    let protocol = str_field(obj, &["protocol", "proto"])
        .and_then(|p| Protocol::parse(&p))
        .unwrap_or_default();
    Some(RegistryEntry {
        name,
        container: str_field(obj, CONTAINER_REF_KEYS).map(|c| clean_name(&c)),
        host_port,
        protocol,
        description: str_field(obj, &["description", "note", "purpose"]),
    })
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn clean_name(name: &str) -> String {
    name.trim().trim_start_matches('/').to_string()
}
