use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of an instance in the instance store
pub type InstanceId = u64;

/// Lifecycle status of an instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Pending,
    Building,
    Starting,
    Active,
    Stopping,
    Stopped,
    Rebooting,
    Unavailable,
    Error,
    Deleting,
    Deleted,
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "PENDING",
            InstanceStatus::Building => "BUILDING",
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::Active => "ACTIVE",
            InstanceStatus::Stopping => "STOPPING",
            InstanceStatus::Stopped => "STOPPED",
            InstanceStatus::Rebooting => "REBOOTING",
            InstanceStatus::Unavailable => "UNAVAILABLE",
            InstanceStatus::Error => "ERROR",
            InstanceStatus::Deleting => "DELETING",
            InstanceStatus::Deleted => "DELETED",
            InstanceStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network protocol exposed by an image (e.g. SSH, RDP, HTTP)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Protocol {
    pub id: u64,
    pub name: String,
    /// Default port for the protocol
    pub port: u16,
}

/// A protocol as configured on a particular image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageProtocol {
    pub protocol: Protocol,
    /// Image specific port, overriding the protocol default
    #[serde(default)]
    pub port: Option<u16>,
}

impl ImageProtocol {
    /// Port the container listens on for this protocol
    pub fn get_port(&self) -> u16 {
        self.port.unwrap_or(self.protocol.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageVolume {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Image {
    pub id: u64,
    pub name: String,
    /// Registry prefix, e.g. `registry.example.org/team`
    #[serde(default)]
    pub repository: Option<String>,
    pub path: String,
    #[serde(default)]
    pub command: Option<String>,
    /// Comma separated container arguments
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub protocols: Vec<ImageProtocol>,
    #[serde(default)]
    pub volumes: Vec<ImageVolume>,
    #[serde(default)]
    pub env_vars: Vec<EnvVar>,
    #[serde(default)]
    pub run_as_uid: Option<i64>,
}

impl Image {
    /// Fully qualified image reference handed to the container runtime
    pub fn reference(&self) -> String {
        match &self.repository {
            Some(repository) if !repository.is_empty() => format!("{}/{}", repository, self.path),
            _ => self.path.clone(),
        }
    }
}

/// Resource sizing of an instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flavour {
    pub id: u64,
    pub name: String,
    /// CPU cores (fractional values allowed)
    pub cpu: f64,
    /// Memory in MiB
    pub memory: u32,
}

/// Account the workload runs on behalf of
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InstanceAccount {
    pub username: String,
    #[serde(default)]
    pub uid: Option<i64>,
    #[serde(default)]
    pub gid: Option<i64>,
    #[serde(default)]
    pub home_path: Option<String>,
}

/// A user requested compute workload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub image: Image,
    pub flavour: Flavour,
    #[serde(default)]
    pub account: InstanceAccount,
    /// Cluster identifier of the provisioned workload
    #[serde(default)]
    pub compute_id: Option<String>,
    pub status: InstanceStatus,
    /// Diagnostic attached to the current status
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn set_status(&mut self, status: InstanceStatus, message: Option<String>) {
        self.status = status;
        self.status_message = message;
    }
}

/// Lifecycle command kinds accepted by the action scheduler
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceCommandType {
    Create,
    State,
    Start,
    Shutdown,
    Reboot,
    Delete,
}

impl fmt::Display for InstanceCommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceCommandType::Create => "CREATE",
            InstanceCommandType::State => "STATE",
            InstanceCommandType::Start => "START",
            InstanceCommandType::Shutdown => "SHUTDOWN",
            InstanceCommandType::Reboot => "REBOOT",
            InstanceCommandType::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Request to run one lifecycle transition against one instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceCommand {
    pub instance_id: InstanceId,
    #[serde(rename = "type")]
    pub command_type: InstanceCommandType,
}

impl InstanceCommand {
    pub fn new(instance_id: InstanceId, command_type: InstanceCommandType) -> Self {
        Self { instance_id, command_type }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol(name: &str, port: u16) -> Protocol {
        Protocol { id: 1, name: name.to_string(), port }
    }

    #[test]
    fn test_image_protocol_port_falls_back_to_protocol_default() {
        let default = ImageProtocol { protocol: protocol("SSH", 22), port: None };
        let custom = ImageProtocol { protocol: protocol("SSH", 22), port: Some(2222) };

        assert_eq!(default.get_port(), 22);
        assert_eq!(custom.get_port(), 2222);
    }

    #[test]
    fn test_image_reference_with_and_without_repository() {
        let mut image = Image {
            id: 1,
            name: "desktop".to_string(),
            repository: Some("registry.example.org/lab".to_string()),
            path: "desktop:1.0".to_string(),
            command: None,
            args: None,
            protocols: vec![],
            volumes: vec![],
            env_vars: vec![],
            run_as_uid: None,
        };
        assert_eq!(image.reference(), "registry.example.org/lab/desktop:1.0");

        image.repository = None;
        assert_eq!(image.reference(), "desktop:1.0");
    }

    #[test]
    fn test_status_serializes_in_upper_case() {
        let json = serde_json::to_string(&InstanceStatus::Active).unwrap();
        assert_eq!(json, "\"ACTIVE\"");

        let parsed: InstanceStatus = serde_json::from_str("\"DELETING\"").unwrap();
        assert_eq!(parsed, InstanceStatus::Deleting);
        assert_eq!(parsed.to_string(), "DELETING");
    }

    #[test]
    fn test_command_uses_type_field() {
        let command: InstanceCommand =
            serde_json::from_str(r#"{"instance_id": 3, "type": "REBOOT"}"#).unwrap();
        assert_eq!(command, InstanceCommand::new(3, InstanceCommandType::Reboot));
    }
}
