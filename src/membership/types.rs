use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static NODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:]+):(\d+)/(.+)$").expect("Invalid node name pattern"));

/// Node identity `host:port/tag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeName {
    pub host: String,
    pub port: u16,
    pub tag: String,
}

impl NodeName {
    /// `host:port` the node's HTTP endpoint listens on.
    pub fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Same port and tag on another host.
    pub fn with_host(&self, host: &str) -> NodeName {
        NodeName {
            host: host.to_string(),
            port: self.port,
            tag: self.tag.clone(),
        }
    }
}

impl FromStr for NodeName {
    type Err = ControlError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let invalid = || ControlError::InvalidNode(name.to_string());
        let captures = NODE_PATTERN.captures(name).ok_or_else(invalid)?;
        Ok(NodeName {
            host: captures[1].to_string(),
            port: captures[2].parse().map_err(|_| invalid())?,
            tag: captures[3].to_string(),
        })
    }
}

impl TryFrom<String> for NodeName {
    type Error = ControlError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl From<NodeName> for String {
    fn from(name: NodeName) -> Self {
        name.to_string()
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.tag)
    }
}

/// Cluster membership control operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    ChangeRole {
        role: String,
    },
    ReportStatus {
        key: String,
    },
    /// Run by the joining node.
    Join {
        node: NodeName,
        source: NodeName,
        dataset: String,
        copy: bool,
    },
    AbsorbData {
        source: String,
        dataset: Option<String>,
        port: Option<u16>,
        tag: Option<String>,
    },
    SetReplicas {
        dataset: String,
        hosts: Vec<String>,
    },
    AddReplicas {
        dataset: String,
        hosts: Vec<String>,
    },
    RemoveReplicas {
        dataset: String,
        hosts: Vec<String>,
    },
    UpdateLiveNodes,
}

impl ControlCommand {
    /// Builds a command from its name and parameter map.
    pub fn parse(name: &str, params: &Value) -> Result<Self, ControlError> {
        match name {
            "change_role" => Ok(ControlCommand::ChangeRole {
                role: required_string(params, "role")?,
            }),
            "report_status" => Ok(ControlCommand::ReportStatus {
                key: required_string(params, "key")?,
            }),
            "join" => {
                let kind = optional_string(params, "type");
                if kind.as_deref().is_some_and(|kind| kind != "replica") {
                    return Err(ControlError::InvalidParameter {
                        name: "type".to_string(),
                        reason: format!("unsupported join type {:?}", kind),
                    });
                }
                Ok(ControlCommand::Join {
                    node: required_string(params, "node")?.parse()?,
                    source: required_string(params, "source")?.parse()?,
                    dataset: required_string(params, "dataset")?,
                    copy: params.get("copy").is_some_and(truthy),
                })
            }
            "absorb_data" => Ok(ControlCommand::AbsorbData {
                source: required_string(params, "source")?,
                dataset: optional_string(params, "dataset"),
                port: params
                    .get("port")
                    .and_then(Value::as_u64)
                    .and_then(|port| u16::try_from(port).ok()),
                tag: optional_string(params, "tag"),
            }),
            "set_replicas" => Ok(ControlCommand::SetReplicas {
                dataset: required_string(params, "dataset")?,
                hosts: hosts(params)?,
            }),
            "add_replicas" => Ok(ControlCommand::AddReplicas {
                dataset: required_string(params, "dataset")?,
                hosts: hosts(params)?,
            }),
            "remove_replicas" => Ok(ControlCommand::RemoveReplicas {
                dataset: required_string(params, "dataset")?,
                hosts: hosts(params)?,
            }),
            "update_live_nodes" => Ok(ControlCommand::UpdateLiveNodes),
            other => Err(ControlError::UnknownCommand(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::ChangeRole { .. } => "change_role",
            ControlCommand::ReportStatus { .. } => "report_status",
            ControlCommand::Join { .. } => "join",
            ControlCommand::AbsorbData { .. } => "absorb_data",
            ControlCommand::SetReplicas { .. } => "set_replicas",
            ControlCommand::AddReplicas { .. } => "add_replicas",
            ControlCommand::RemoveReplicas { .. } => "remove_replicas",
            ControlCommand::UpdateLiveNodes => "update_live_nodes",
        }
    }
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn optional_string(params: &Value, name: &str) -> Option<String> {
    params.get(name).and_then(Value::as_str).map(str::to_string)
}

fn required_string(params: &Value, name: &str) -> Result<String, ControlError> {
    optional_string(params, name).ok_or_else(|| ControlError::MissingParameter(name.to_string()))
}

/// `hosts` may be a single string or a list of strings.
fn hosts(params: &Value) -> Result<Vec<String>, ControlError> {
    match params.get("hosts") {
        Some(Value::String(host)) => Ok(vec![host.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ControlError::InvalidParameter {
                        name: "hosts".to_string(),
                        reason: format!("expected host name, got {}", item),
                    })
            })
            .collect(),
        Some(other) => Err(ControlError::InvalidParameter {
            name: "hosts".to_string(),
            reason: format!("expected string or list, got {}", other),
        }),
        None => Err(ControlError::MissingParameter("hosts".to_string())),
    }
}

/// Result of a control operation: what was done, and a value where one applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub log: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ControlResponse {
    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{}", line);
        self.log.push(line);
    }
}

/// Progress of copying a dataset from another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AbsorbState {
    Idle,
    Absorbing { dataset: String, source: String },
    Ready { dataset: String, source: String },
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown control command: {0}")]
    UnknownCommand(String),

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("invalid node name {0:?}, expected host:port/tag")]
    InvalidNode(String),

    #[error("already absorbing {dataset} from {from}")]
    AlreadyAbsorbing { dataset: String, from: String },

    #[error("node {node} did not become ready within {waited:?}")]
    NotReady {
        node: String,
        waited: std::time::Duration,
    },

    #[error(transparent)]
    Catalog(#[from] crate::catalog::CatalogError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
