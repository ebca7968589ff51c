//! Node HTTP Protocol
//!
//! Endpoints and Data Transfer Objects exchanged between nodes, clients and
//! the external membership service. Everything travels as JSON.

use crate::catalog::{CatalogModel, CatalogVersion};
use crate::membership::AbsorbState;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// --- API Endpoints ---

/// Resolves a routing request to destination addresses.
pub const ENDPOINT_ROUTE: &str = "/route";
/// Accepts client requests and task messages from other nodes.
pub const ENDPOINT_MESSAGE: &str = "/message";
/// Receives partial results for sessions owned by this node.
pub const ENDPOINT_RESULT: &str = "/internal/result";
/// Membership control operations, one path per command.
pub const ENDPOINT_CONTROL: &str = "/control/:command";
/// Node status and a summary of the active catalog.
pub const ENDPOINT_STATUS: &str = "/status";
/// Full JSON of the active catalog.
pub const ENDPOINT_CATALOG: &str = "/catalog";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub destinations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Answer to a client request once its session is finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplyResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// Acknowledgement for fire-and-forget internal traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub name: String,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub version: u8,
    pub effective_date: String,
    pub datasets: Vec<DatasetSummary>,
}

impl CatalogSummary {
    pub fn of(model: &CatalogModel) -> Self {
        Self {
            version: match model.version() {
                CatalogVersion::V1 => 1,
                CatalogVersion::V2 => 2,
            },
            effective_date: model.effective_date().to_rfc3339(),
            datasets: model
                .datasets()
                .iter()
                .map(|dataset| DatasetSummary {
                    name: dataset.name.clone(),
                    hosts: dataset.hosts.clone(),
                })
                .collect(),
        }
    }

    pub fn hosts_of(&self, dataset: &str) -> Option<&[String]> {
        self.datasets
            .iter()
            .find(|summary| summary.name == dataset)
            .map(|summary| summary.hosts.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node: String,
    /// Persisted node status (`role`, `absorbing`, ...).
    pub status: Map<String, Value>,
    pub absorb: AbsorbState,
    pub active_sessions: usize,
    pub catalog: CatalogSummary,
}
