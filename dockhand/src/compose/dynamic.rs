//! Dynamic compose schema and compose document emission
//!
//! A dynamic compose document (`docker-compose.json` in an app directory) lists
//! service descriptors plus architecture-scoped partial overrides. Fields that accept
//! more than one shape (`dependsOn`, ports, ulimits, ...) are untagged enums, so
//! whichever shape the author wrote survives parsing, merging and emission as-is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One app's declarative compose description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicCompose {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,

    pub services: Vec<ServiceDescriptor>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<ArchitectureOverride>,
}

/// Partial services applied on one architecture only.
///
/// Services are kept as raw JSON objects: any subset of descriptor fields plus `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureOverride {
    pub architecture: String,
    pub services: Vec<serde_json::Value>,
}

/// A single service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: String,
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    /// Container port published on `${APP_PORT}` when `is_main`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_port: Option<PortNumber>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_main: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_ports: Vec<PortSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOn>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ulimits: BTreeMap<String, UlimitSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Deploy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_drop: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shm_size: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Container port, either a number or a string such as "8080"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortNumber {
    Number(u16),
    Text(String),
}

impl std::fmt::Display for PortNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortNumber::Number(n) => write!(f, "{}", n),
            PortNumber::Text(s) => f.write_str(s),
        }
    }
}

/// `command` / `entrypoint`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Line(String),
    Args(Vec<String>),
}

/// `environment` as a map or a `KEY=value` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    Map(BTreeMap<String, EnvValue>),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

/// An extra port: bare container port or a structured mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Bare(u16),
    Mapping(PortMapping),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    pub host_path: String,
    pub container_path: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub test: CommandSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_interval: Option<String>,
}

/// `depends_on` as a list of names or a map of conditions. Never normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, DependsOnCondition>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependsOnCondition {
    pub condition: ServiceCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCondition {
    ServiceHealthy,
    ServiceStarted,
    ServiceCompletedSuccessfully,
}

/// A ulimit as a single number or a soft/hard pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UlimitSpec {
    Bare(i64),
    Limits { soft: i64, hard: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deploy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservations: Option<ResourceSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<EnvValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<EnvValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

// ============================ COMPOSE DOCUMENT ================================ //

/// The concrete document handed to the container runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeDocument {
    pub services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    pub image: String,
    pub container_name: String,
    pub restart: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ComposePort>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<ComposeHealthCheck>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOn>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ulimits: BTreeMap<String, UlimitSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Deploy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_drop: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shm_size: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Compose `ports` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComposePort {
    /// Bare container port, emitted as a number
    Bare(u16),
    /// Short syntax string
    Short(String),
    /// Long syntax
    Long {
        target: u16,
        published: String,
        protocol: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_ip: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeHealthCheck {
    pub test: CommandSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_interval: Option<String>,
}

impl From<&ServiceDescriptor> for ComposeService {
    fn from(service: &ServiceDescriptor) -> Self {
        let mut ports = Vec::new();
        if service.is_main {
            if let Some(internal) = &service.internal_port {
                ports.push(ComposePort::Short(format!("${{APP_PORT}}:{}", internal)));
            }
        }
        for port in &service.add_ports {
            ports.extend(emit_port(port));
        }

        Self {
            image: service.image.clone(),
            container_name: service.name.clone(),
            restart: "unless-stopped".to_string(),
            command: service.command.clone(),
            entrypoint: service.entrypoint.clone(),
            environment: service.environment.clone(),
            ports,
            volumes: service.volumes.iter().map(emit_volume).collect(),
            healthcheck: service.health_check.as_ref().map(|h| ComposeHealthCheck {
                test: h.test.clone(),
                interval: h.interval.clone(),
                timeout: h.timeout.clone(),
                retries: h.retries,
                start_period: h.start_period.clone(),
                start_interval: h.start_interval.clone(),
            }),
            depends_on: service.depends_on.clone(),
            ulimits: service.ulimits.clone(),
            deploy: service.deploy.clone(),
            cap_add: service.cap_add.clone(),
            cap_drop: service.cap_drop.clone(),
            network_mode: service.network_mode.clone(),
            extra_hosts: service.extra_hosts.clone(),
            devices: service.devices.clone(),
            hostname: service.hostname.clone(),
            user: service.user.clone(),
            working_dir: service.working_dir.clone(),
            privileged: service.privileged,
            shm_size: service.shm_size.clone(),
            labels: service.labels.clone(),
        }
    }
}

fn emit_port(port: &PortSpec) -> Vec<ComposePort> {
    match port {
        PortSpec::Bare(n) => vec![ComposePort::Bare(*n)],
        PortSpec::Mapping(m) => {
            let udp = m.udp.unwrap_or(false);
            // tcp is implied unless the mapping is udp-only
            let tcp = m.tcp.unwrap_or(!udp);
            let protocols = [("tcp", tcp), ("udp", udp)];
            protocols
                .iter()
                .filter(|(_, enabled)| *enabled)
                .map(|(protocol, _)| ComposePort::Long {
                    target: m.container_port,
                    published: m.host_port.to_string(),
                    protocol: protocol.to_string(),
                    host_ip: m.interface.clone(),
                })
                .collect()
        }
    }
}

fn emit_volume(volume: &VolumeSpec) -> String {
    if volume.read_only {
        format!("{}:{}:ro", volume.host_path, volume.container_path)
    } else {
        format!("{}:{}", volume.host_path, volume.container_path)
    }
}

impl ComposeDocument {
    /// Build a document from already-merged services
    pub fn from_services(services: &[ServiceDescriptor]) -> Self {
        Self {
            services: services
                .iter()
                .map(|s| (s.name.clone(), ComposeService::from(s)))
                .collect(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(value: serde_json::Value) -> ServiceDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_depends_on_shapes_preserved() {
        let list = service(json!({"name": "web", "image": "nginx", "dependsOn": ["db"]}));
        assert_eq!(list.depends_on, Some(DependsOn::List(vec!["db".into()])));

        let map = service(json!({
            "name": "web", "image": "nginx",
            "dependsOn": {"db": {"condition": "service_healthy"}}
        }));
        let emitted = serde_json::to_value(ComposeService::from(&map)).unwrap();
        assert_eq!(
            emitted["depends_on"],
            json!({"db": {"condition": "service_healthy"}})
        );

        let emitted = serde_json::to_value(ComposeService::from(&list)).unwrap();
        assert_eq!(emitted["depends_on"], json!(["db"]));
    }

    #[test]
    fn test_ulimit_shapes_preserved() {
        let s = service(json!({
            "name": "db", "image": "postgres",
            "ulimits": {"nproc": 65535, "nofile": {"soft": 20000, "hard": 40000}}
        }));
        let emitted = serde_json::to_value(ComposeService::from(&s)).unwrap();
        assert_eq!(emitted["ulimits"]["nproc"], json!(65535));
        assert_eq!(
            emitted["ulimits"]["nofile"],
            json!({"soft": 20000, "hard": 40000})
        );
    }

    #[test]
    fn test_port_emission() {
        let s = service(json!({
            "name": "web", "image": "nginx", "isMain": true, "internalPort": 80,
            "addPorts": [
                53,
                {"containerPort": 53, "hostPort": 5353, "udp": true, "tcp": true, "interface": "127.0.0.1"},
                {"containerPort": 443, "hostPort": 8443}
            ]
        }));
        let ports = ComposeService::from(&s).ports;
        assert_eq!(ports[0], ComposePort::Short("${APP_PORT}:80".into()));
        assert_eq!(ports[1], ComposePort::Bare(53));
        assert_eq!(ports.len(), 5);
        assert!(matches!(
            &ports[3],
            ComposePort::Long { protocol, host_ip: Some(ip), .. } if protocol == "udp" && ip == "127.0.0.1"
        ));
        assert!(matches!(
            &ports[4],
            ComposePort::Long { target: 443, protocol, .. } if protocol == "tcp"
        ));
    }

    #[test]
    fn test_yaml_emission() {
        let s = service(json!({
            "name": "web", "image": "nginx:1.27",
            "volumes": [{"hostPath": "${APP_DATA_DIR}/data", "containerPath": "/data", "readOnly": true}],
            "environment": {"PUID": 1000, "TZ": "${TZ}"}
        }));
        let yaml = ComposeDocument::from_services(&[s]).to_yaml().unwrap();
        assert!(yaml.contains("container_name: web"));
        assert!(yaml.contains("${APP_DATA_DIR}/data:/data:ro"));
        assert!(yaml.contains("PUID: 1000"));
    }
}
