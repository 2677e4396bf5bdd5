// Container, port and network models (normalized upstream state)

use serde::{Deserialize, Serialize};
use std::fmt;
use wincode::{SchemaRead, SchemaWrite};

/// Version of the normalized `State` schema consumed by the core.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Transport protocol; serializes to lowercase JSON ("tcp", "udp").
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    SchemaRead,
    SchemaWrite,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// Parse a protocol label; accepts any case ("TCP", "udp").
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published port: host port → container port over a protocol.
/// JSON shape is `{host, container, protocol}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "host")]
    pub host_port: u16,
    #[serde(rename = "container")]
    pub container_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortBinding {
    pub fn new(host_port: u16, container_port: u16, protocol: Protocol) -> Self {
        Self {
            host_port,
            container_port,
            protocol,
        }
    }

    pub fn tcp(host_port: u16, container_port: u16) -> Self {
        Self::new(host_port, container_port, Protocol::Tcp)
    }

    pub fn udp(host_port: u16, container_port: u16) -> Self {
        Self::new(host_port, container_port, Protocol::Udp)
    }

    /// Both ports within 1..=65535.
    pub fn is_valid(&self) -> bool {
        self.host_port != 0 && self.container_port != 0
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}/{}",
            self.host_port, self.container_port, self.protocol
        )
    }
}

/// Sorted, de-duplicated copy of a binding list; used for set comparison.
pub fn canonical_ports(ports: &[PortBinding]) -> Vec<PortBinding> {
    let mut out = ports.to_vec();
    out.sort();
    out.dedup();
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAttachment {
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub gateway: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    #[serde(default)]
    pub ports: Vec<PortBinding>,
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
}

impl Container {
    pub fn has_udp(&self) -> bool {
        self.ports.iter().any(|p| p.protocol == Protocol::Udp)
    }
}

/// Port registry entry from the upstream registry feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One flattened port row, keyed by (container, protocol, containerPort).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, SchemaRead, SchemaWrite,
)]
#[serde(rename_all = "camelCase")]
pub struct PortRecord {
    pub container: String,
    pub container_port: u16,
    pub protocol: Protocol,
    pub host: u16,
}

/// Normalized snapshot of upstream state. A new fetch wholly replaces the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub schema_version: u32,
    pub fetched_at: i64,
    pub containers: Vec<Container>,
    #[serde(default)]
    pub registry: Vec<RegistryEntry>,
}

impl State {
    pub fn new(fetched_at: i64, containers: Vec<Container>, registry: Vec<RegistryEntry>) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            fetched_at,
            containers,
            registry,
        }
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn port_records(&self) -> Vec<PortRecord> {
        let mut out: Vec<PortRecord> = self
            .containers
            .iter()
            .flat_map(|c| {
                c.ports.iter().map(|p| PortRecord {
                    container: c.name.clone(),
                    container_port: p.container_port,
                    protocol: p.protocol,
                    host: p.host_port,
                })
            })
            .collect();
        out.sort();
        out
    }
}
