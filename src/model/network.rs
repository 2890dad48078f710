//! Network and sandbox policy
//!
//! The compiler does not enforce either policy. It validates them and
//! emits configuration for the firewall and sandbox layers.

use super::safe_outputs::{bool_value, string_list, string_map, string_value};
use super::validation::Collector;
use crate::error::ErrorCode;
use serde::Serialize;
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};
use url::Host;

/// Domains allowed by `network: defaults`
pub const DEFAULT_DOMAINS: &[&str] = &[
    "*.githubusercontent.com",
    "api.github.com",
    "codeload.github.com",
    "github.com",
    "ghcr.io",
    "crates.io",
    "index.crates.io",
    "static.crates.io",
    "pypi.org",
    "files.pythonhosted.org",
    "registry.npmjs.org",
];

pub const DEFAULT_GATEWAY_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkPolicy {
    /// `None` means the platform default allow-list
    pub allowed: Option<Vec<String>>,
    pub firewall: bool,
    /// False when the document never mentioned `network`
    #[serde(skip)]
    pub declared: bool,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self {
            allowed: None,
            firewall: false,
            declared: false,
        }
    }
}

impl NetworkPolicy {
    pub fn parse(value: Option<&Value>, errors: &mut Collector) -> NetworkPolicy {
        let mut policy = NetworkPolicy::default();
        let Some(value) = value else {
            return policy;
        };
        policy.declared = true;

        match value {
            Value::String(keyword) if keyword == "defaults" => {}
            Value::Mapping(settings) => {
                policy.allowed = Some(Vec::new());
                for (key, entry) in settings {
                    let key = key.as_str().unwrap_or_default();
                    let path = format!("network.{key}");
                    match key {
                        "allowed" => {
                            let mut domains = Vec::new();
                            for domain in string_list(entry, &path, errors) {
                                if domain == "defaults" {
                                    domains.extend(DEFAULT_DOMAINS.iter().map(|d| d.to_string()));
                                } else if let Err(message) = validate_domain(&domain) {
                                    errors.push(ErrorCode::VALIDATION_NETWORK, &path, message);
                                } else {
                                    domains.push(domain.to_ascii_lowercase());
                                }
                            }
                            domains.sort();
                            domains.dedup();
                            policy.allowed = Some(domains);
                        }
                        "firewall" => policy.firewall = bool_value(entry, &path, errors),
                        other => errors.push_unknown(
                            ErrorCode::VALIDATION_UNKNOWN_KEY,
                            path,
                            format!("unknown network setting `{other}`"),
                            other,
                            &["allowed", "firewall"],
                        ),
                    }
                }
            }
            _ => errors.push(
                ErrorCode::VALIDATION_NETWORK,
                "network",
                "network must be `defaults` or a mapping with `allowed`",
            ),
        }
        policy
    }

    /// Effective allow-list with extra domains (engine endpoints) folded in
    pub fn effective_domains(&self, extra: &[&str]) -> Vec<String> {
        let mut domains: Vec<String> = match &self.allowed {
            Some(allowed) => allowed.clone(),
            None => DEFAULT_DOMAINS.iter().map(|d| d.to_string()).collect(),
        };
        domains.extend(extra.iter().map(|d| d.to_string()));
        domains.sort();
        domains.dedup();
        domains
    }
}

/// Accepts `example.com` and `*.example.com`, nothing with a scheme, port or path
pub fn validate_domain(domain: &str) -> Result<(), String> {
    if domain.contains("://") || domain.contains('/') || domain.contains(':') {
        return Err(format!("`{domain}` must be a bare domain without scheme, port or path"));
    }
    let name = domain.strip_prefix("*.").unwrap_or(domain);
    if name.contains('*') {
        return Err(format!("`{domain}` may only use a leading `*.` wildcard"));
    }
    match Host::parse(name) {
        Ok(Host::Domain(parsed)) if parsed.contains('.') || parsed == "localhost" => Ok(()),
        Ok(Host::Domain(_)) => Err(format!("`{domain}` is not a fully qualified domain")),
        Ok(_) => Err(format!("`{domain}` is an IP address; list domains instead")),
        Err(err) => Err(format!("`{domain}` is not a valid domain: {err}")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxAgent {
    Awf,
    Srt,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MountMode {
    #[serde(rename = "ro")]
    ReadOnly,
    #[serde(rename = "rw")]
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub source: String,
    pub destination: String,
    pub mode: MountMode,
}

impl Mount {
    /// Parse `source:destination:mode`
    pub fn parse(spec: &str) -> Result<Mount, String> {
        let parts: Vec<&str> = spec.split(':').collect();
        let [source, destination, mode] = parts.as_slice() else {
            return Err(format!(
                "mount `{spec}` must have the form `source:destination:ro` or `source:destination:rw`"
            ));
        };
        let mode = match *mode {
            "ro" => MountMode::ReadOnly,
            "rw" => MountMode::ReadWrite,
            other => {
                return Err(format!("mount `{spec}` has access mode `{other}`; use `ro` or `rw`"))
            }
        };
        if source.is_empty() {
            return Err(format!("mount `{spec}` has an empty source"));
        }
        if !destination.starts_with('/') {
            return Err(format!("mount `{spec}` needs an absolute destination"));
        }
        Ok(Mount {
            source: source.to_string(),
            destination: destination.to_string(),
            mode,
        })
    }

    pub fn spec(&self) -> String {
        let mode = match self.mode {
            MountMode::ReadOnly => "ro",
            MountMode::ReadWrite => "rw",
        };
        format!("{}:{}:{}", self.source, self.destination, mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayNetworkMode {
    Bridge,
    Host,
}

/// MCP gateway container fronting tool servers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gateway {
    pub container: String,
    pub port: u16,
    pub network_mode: GatewayNetworkMode,
    pub mounts: Vec<Mount>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxPolicy {
    pub agent: SandboxAgent,
    pub mounts: Vec<Mount>,
    pub gateway: Option<Gateway>,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            agent: SandboxAgent::None,
            mounts: Vec::new(),
            gateway: None,
        }
    }
}

impl SandboxPolicy {
    pub fn parse(value: Option<&Value>, errors: &mut Collector) -> SandboxPolicy {
        let mut policy = SandboxPolicy::default();
        let settings = match value {
            None | Some(Value::Null) => return policy,
            Some(Value::String(agent)) => {
                policy.agent = parse_agent(agent, "sandbox", errors);
                return policy;
            }
            Some(Value::Mapping(settings)) => settings,
            Some(_) => {
                errors.push(ErrorCode::VALIDATION_SANDBOX, "sandbox", "sandbox must be a mapping");
                return policy;
            }
        };

        for (key, entry) in settings {
            let key = key.as_str().unwrap_or_default();
            let path = format!("sandbox.{key}");
            match key {
                "agent" => {
                    if let Some(agent) = string_value(entry, &path, errors) {
                        policy.agent = parse_agent(&agent, &path, errors);
                    }
                }
                "mounts" => policy.mounts = parse_mounts(entry, &path, errors),
                "gateway" => policy.gateway = parse_gateway(entry, &path, errors),
                other => errors.push_unknown(
                    ErrorCode::VALIDATION_UNKNOWN_KEY,
                    path,
                    format!("unknown sandbox setting `{other}`"),
                    other,
                    &["agent", "mounts", "gateway"],
                ),
            }
        }
        policy
    }

    /// Rules that span the sandbox and network blocks
    pub fn check_against(&self, network: &NetworkPolicy, errors: &mut Collector) {
        if self.agent == SandboxAgent::Srt && network.firewall {
            errors.push(
                ErrorCode::VALIDATION_SANDBOX,
                "sandbox.agent",
                "the `srt` sandbox enforces its own network policy and cannot be combined with `network.firewall: true`",
            );
        }
        if !self.mounts.is_empty() && self.agent == SandboxAgent::None {
            errors.push(
                ErrorCode::VALIDATION_SANDBOX,
                "sandbox.mounts",
                "mounts need a sandboxed agent (`awf` or `srt`)",
            );
        }
    }

    pub fn firewall_enabled(&self, network: &NetworkPolicy) -> bool {
        network.firewall || self.agent == SandboxAgent::Awf
    }
}

fn parse_agent(name: &str, path: &str, errors: &mut Collector) -> SandboxAgent {
    match name {
        "awf" => SandboxAgent::Awf,
        "srt" => SandboxAgent::Srt,
        "none" => SandboxAgent::None,
        other => {
            errors.push_unknown(
                ErrorCode::VALIDATION_SANDBOX,
                path,
                format!("unknown sandbox agent `{other}`"),
                other,
                &["awf", "srt", "none"],
            );
            SandboxAgent::None
        }
    }
}

fn parse_mounts(value: &Value, path: &str, errors: &mut Collector) -> Vec<Mount> {
    let mut mounts = Vec::new();
    let mut destinations = HashSet::new();
    for spec in string_list(value, path, errors) {
        match Mount::parse(&spec) {
            Ok(mount) => {
                if !destinations.insert(mount.destination.clone()) {
                    errors.push(
                        ErrorCode::VALIDATION_SANDBOX,
                        path,
                        format!("destination `{}` is mounted more than once", mount.destination),
                    );
                    continue;
                }
                mounts.push(mount);
            }
            Err(message) => errors.push(ErrorCode::VALIDATION_SANDBOX, path, message),
        }
    }
    mounts
}

fn parse_gateway(value: &Value, path: &str, errors: &mut Collector) -> Option<Gateway> {
    let Value::Mapping(settings) = value else {
        errors.push(ErrorCode::VALIDATION_SANDBOX, path, "gateway must be a mapping");
        return None;
    };

    let mut container = None;
    let mut port = DEFAULT_GATEWAY_PORT;
    let mut network_mode = GatewayNetworkMode::Bridge;
    let mut mounts = Vec::new();
    let mut env = BTreeMap::new();

    for (key, entry) in settings {
        let key = key.as_str().unwrap_or_default();
        let entry_path = format!("{path}.{key}");
        match key {
            "container" => container = string_value(entry, &entry_path, errors),
            "port" => match entry.as_u64() {
                Some(n @ 1..=65535) => port = n as u16,
                _ => errors.push(
                    ErrorCode::VALIDATION_SANDBOX,
                    entry_path,
                    "gateway port must be between 1 and 65535",
                ),
            },
            "network-mode" => match entry.as_str() {
                Some("bridge") => network_mode = GatewayNetworkMode::Bridge,
                Some("host") => network_mode = GatewayNetworkMode::Host,
                other => errors.push_unknown(
                    ErrorCode::VALIDATION_SANDBOX,
                    entry_path,
                    "gateway network-mode must be `bridge` or `host`",
                    other.unwrap_or_default(),
                    &["bridge", "host"],
                ),
            },
            "mounts" => mounts = parse_mounts(entry, &entry_path, errors),
            "env" => env = string_map(entry, &entry_path, errors),
            other => errors.push_unknown(
                ErrorCode::VALIDATION_UNKNOWN_KEY,
                entry_path,
                format!("unknown gateway setting `{other}`"),
                other,
                &["container", "port", "network-mode", "mounts", "env"],
            ),
        }
    }

    match container {
        Some(container) if !container.trim().is_empty() => Some(Gateway {
            container,
            port,
            network_mode,
            mounts,
            env,
        }),
        _ => {
            errors.push(
                ErrorCode::VALIDATION_SANDBOX,
                format!("{path}.container"),
                "a gateway requires a container image",
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_network_defaults_and_deny_all() {
        let mut errors = Collector::new();
        let policy = NetworkPolicy::parse(Some(&yaml("defaults")), &mut errors);
        assert!(policy.declared);
        assert_eq!(policy.allowed, None);

        let policy = NetworkPolicy::parse(Some(&yaml("{}")), &mut errors);
        assert_eq!(policy.allowed, Some(vec![]));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_network_allow_list_is_validated() {
        let mut errors = Collector::new();
        let policy = NetworkPolicy::parse(
            Some(&yaml("allowed: [\"*.Example.com\", api.acme.dev, \"https://evil.com\", \"foo.*.com\"]")),
            &mut errors,
        );
        assert_eq!(errors.len(), 2);
        assert_eq!(
            policy.allowed,
            Some(vec!["*.example.com".to_string(), "api.acme.dev".to_string()])
        );
    }

    #[test]
    fn test_effective_domains_merge_engine_endpoints() {
        let policy = NetworkPolicy {
            allowed: Some(vec!["example.com".into()]),
            firewall: true,
            declared: true,
        };
        assert_eq!(
            policy.effective_domains(&["api.anthropic.com", "example.com"]),
            vec!["api.anthropic.com".to_string(), "example.com".to_string()]
        );
    }

    #[test]
    fn test_mount_requires_mode_and_absolute_destination() {
        assert!(Mount::parse("/data:/data:ro").is_ok());
        assert!(Mount::parse("/data:/data").is_err());
        assert!(Mount::parse("/data:/data:rx").is_err());
        assert!(Mount::parse("/data:data:rw").is_err());
    }

    #[test]
    fn test_duplicate_mount_destination() {
        let mut errors = Collector::new();
        let policy = SandboxPolicy::parse(
            Some(&yaml("agent: awf\nmounts: [\"/a:/work:ro\", \"/b:/work:rw\"]")),
            &mut errors,
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(policy.mounts.len(), 1);
    }

    #[test]
    fn test_gateway_rules() {
        let mut errors = Collector::new();
        let policy = SandboxPolicy::parse(
            Some(&yaml("agent: awf\ngateway:\n  container: ghcr.io/acme/gateway\n  network-mode: host\n")),
            &mut errors,
        );
        assert!(errors.is_empty());
        let gateway = policy.gateway.unwrap();
        assert_eq!(gateway.port, DEFAULT_GATEWAY_PORT);
        assert_eq!(gateway.network_mode, GatewayNetworkMode::Host);

        let mut errors = Collector::new();
        SandboxPolicy::parse(Some(&yaml("gateway:\n  port: 70000\n")), &mut errors);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_srt_conflicts_with_firewall() {
        let mut errors = Collector::new();
        let sandbox = SandboxPolicy::parse(Some(&yaml("agent: srt")), &mut errors);
        let network = NetworkPolicy::parse(Some(&yaml("allowed: [example.com]\nfirewall: true")), &mut errors);
        sandbox.check_against(&network, &mut errors);
        assert_eq!(errors.len(), 1);
    }
}
