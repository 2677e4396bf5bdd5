// Deterministic container classification. Pure: same container + overrides,
// same category, confidence and reasons.

use crate::models::{Category, Classification, Container, Overrides, Protocol, State};

pub const SYSTEM_KEYWORDS: &[&str] = &[
    "postgres",
    "mysql",
    "mariadb",
    "redis",
    "mongo",
    "traefik",
    "caddy",
    "haproxy",
    "portainer",
    "watchtower",
    "pihole",
    "pi-hole",
    "adguard",
    "wireguard",
    "unbound",
    "prometheus",
    "grafana",
    "loki",
    "cadvisor",
    "exporter",
    "dns",
    "vpn",
    "backup",
];

pub const GAMES_KEYWORDS: &[&str] = &[
    "minecraft",
    "mc-",
    "valheim",
    "terraria",
    "factorio",
    "palworld",
    "satisfactory",
    "zomboid",
    "enshrouded",
    "csgo",
    "cs2",
    "steamcmd",
    "gameserver",
    "game-server",
];

pub const APPS_KEYWORDS: &[&str] = &[
    "nginx",
    "httpd",
    "apache",
    "nextcloud",
    "jellyfin",
    "plex",
    "gitea",
    "wordpress",
    "ghost",
    "vaultwarden",
    "homeassistant",
    "home-assistant",
    "immich",
    "uptime-kuma",
    "web",
    "app",
    "api",
    "frontend",
    "backend",
    "dashboard",
];

/// Host ports at or above this hint at game servers.
pub const HIGH_PORT_THRESHOLD: u16 = 20000;
/// Confidence reported when no category wins clearly.
pub const UNKNOWN_CONFIDENCE: f64 = 0.2;
/// Upper bound on heuristic confidence; only overrides reach 1.0.
pub const MAX_HEURISTIC_CONFIDENCE: f64 = 0.95;
const SCORE_SCALE: f64 = 5.0;

pub fn classify(state: &State, overrides: &Overrides) -> Vec<Classification> {
    state
        .containers
        .iter()
        .map(|c| classify_container(c, overrides))
        .collect()
}

pub fn classify_container(container: &Container, overrides: &Overrides) -> Classification {
    if let Some(category) = overrides.get(&container.name) {
        return Classification {
            container: container.name.clone(),
            category,
            confidence: 1.0,
            reasons: vec!["user override".to_string()],
        };
    }

    let haystack = format!("{} {}", container.name, container.image).to_lowercase();
    let mut reasons = Vec::new();
    let mut system = 0u32;
    let mut apps = 0u32;
    let mut games = 0u32;

    if let Some(k) = first_match(&haystack, SYSTEM_KEYWORDS) {
        system += 2;
        reasons.push(format!("keyword '{k}' matched (system +2)"));
    }
    if let Some(k) = first_match(&haystack, APPS_KEYWORDS) {
        apps += 1;
        reasons.push(format!("keyword '{k}' matched (apps +1)"));
    }
    if let Some(k) = first_match(&haystack, GAMES_KEYWORDS) {
        games += 2;
        reasons.push(format!("keyword '{k}' matched (games +2)"));
    }
    if container.has_udp() {
        games += 2;
        reasons.push("udp port present (games +2)".to_string());
    }
    if !container.ports.is_empty() && container.ports.iter().all(|p| p.protocol == Protocol::Tcp)
    {
        apps += 1;
        reasons.push("all ports tcp (apps +1)".to_string());
    }
    if container
        .ports
        .iter()
        .any(|p| p.host_port >= HIGH_PORT_THRESHOLD)
    {
        games += 1;
        reasons.push(format!("host port >= {HIGH_PORT_THRESHOLD} (games +1)"));
    }
    reasons.push(format!("scores: system={system} apps={apps} games={games}"));

    // Stable sort keeps system, apps, games order on ties.
    let mut ranked = [
        (Category::System, system),
        (Category::Apps, apps),
        (Category::Games, games),
    ];
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    let (top_category, top) = ranked[0];
    let runner_up = ranked[1].1;

    let (category, confidence) = if top > 0 && top >= runner_up + 1 {
        (
            top_category,
            (f64::from(top) / SCORE_SCALE).min(MAX_HEURISTIC_CONFIDENCE),
        )
    } else {
        reasons.push("no clear winner".to_string());
        (Category::Unknown, UNKNOWN_CONFIDENCE)
    };

    Classification {
        container: container.name.clone(),
        category,
        confidence,
        reasons,
    }
}

fn first_match<'a>(haystack: &str, keywords: &[&'a str]) -> Option<&'a str> {
    keywords.iter().copied().find(|k| haystack.contains(k))
}
