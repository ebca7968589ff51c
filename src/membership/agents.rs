//! Network-backed collaborators of the control service.

use super::control::{AbsorbRequest, CatalogFetcher, ClusterAgent, DataAbsorber, ReadinessProbe};
use super::types::NodeName;
use crate::catalog::CatalogStore;
use crate::transport::protocol::{ENDPOINT_CATALOG, ENDPOINT_STATUS, StatusResponse};
use crate::transport::retry::Backoff;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const FETCH_ATTEMPTS: usize = 3;

async fn fetch_status(http_client: &reqwest::Client, node: &NodeName) -> Result<StatusResponse> {
    let url = format!("http://{}{}", node.peer(), ENDPOINT_STATUS);
    let response = http_client.get(url).timeout(PROBE_TIMEOUT).send().await?;
    if !response.status().is_success() {
        return Err(anyhow!("Status request failed {}", response.status()));
    }
    Ok(response.json().await?)
}

/// Reads the catalog from the source node's `/catalog` endpoint.
pub struct HttpCatalogFetcher {
    http_client: reqwest::Client,
}

impl HttpCatalogFetcher {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpCatalogFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogFetcher for HttpCatalogFetcher {
    async fn fetch(&self, source: &NodeName, dataset: &str) -> Result<Value> {
        let url = format!(
            "http://{}{}?dataset={}",
            source.peer(),
            ENDPOINT_CATALOG,
            dataset
        );
        let mut backoff = Backoff::new(FETCH_ATTEMPTS);

        loop {
            let failure = match self.http_client.get(&url).timeout(FETCH_TIMEOUT).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp.json().await?),
                Ok(resp) if resp.status().is_client_error() => {
                    return Err(anyhow!("Catalog request to {} failed {}", source, resp.status()));
                }
                Ok(resp) => anyhow!("Catalog request to {} failed {}", source, resp.status()),
                Err(e) => anyhow!(e),
            };

            if !backoff.wait().await {
                return Err(failure).with_context(|| format!("Cannot fetch catalog from {}", source));
            }
        }
    }
}

/// Compares the dataset hosts a node reports on `/status`.
pub struct HttpReadinessProbe {
    http_client: reqwest::Client,
}

impl HttpReadinessProbe {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpReadinessProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReadinessProbe for HttpReadinessProbe {
    async fn is_ready(&self, node: &NodeName, dataset: &str, hosts: &[String]) -> bool {
        match fetch_status(&self.http_client, node).await {
            Ok(status) => status.catalog.hosts_of(dataset) == Some(hosts),
            Err(error) => {
                tracing::debug!("{} not ready yet: {}", node, error);
                false
            }
        }
    }
}

/// Tracks peers this node was told to join; a node is live while it answers `/status`.
pub struct HttpClusterAgent {
    node: NodeName,
    catalog: Arc<CatalogStore>,
    peers: DashSet<String>,
    http_client: reqwest::Client,
}

impl HttpClusterAgent {
    pub fn new(node: NodeName, catalog: Arc<CatalogStore>) -> Self {
        Self {
            node,
            catalog,
            peers: DashSet::new(),
            http_client: reqwest::Client::new(),
        }
    }

    fn candidates(&self) -> Vec<NodeName> {
        let mut names: Vec<String> = self.catalog.current().all_nodes();
        names.extend(self.peers.iter().map(|host| self.node.with_host(&host).to_string()));
        names.sort();
        names.dedup();
        names.iter().filter_map(|name| name.parse().ok()).collect()
    }
}

#[async_trait]
impl ClusterAgent for HttpClusterAgent {
    async fn join(&self, hosts: &[String]) -> Result<()> {
        for host in hosts {
            if host != &self.node.host && self.peers.insert(host.clone()) {
                tracing::info!("Joined peer {}", self.node.with_host(host));
            }
        }
        Ok(())
    }

    async fn live_nodes(&self) -> Result<Vec<String>> {
        let mut live = Vec::new();
        for candidate in self.candidates() {
            if candidate == self.node || fetch_status(&self.http_client, &candidate).await.is_ok() {
                live.push(candidate.to_string());
            } else {
                tracing::debug!("{} is not responding", candidate);
            }
        }
        Ok(live)
    }
}

/// Runs an external copy command; without one, absorbing is a logged no-op.
///
/// The command gets `--dataset`, `--source-host`, `--destination-host`,
/// `--port` and `--tag` arguments.
pub struct CommandAbsorber {
    program: Option<String>,
}

impl CommandAbsorber {
    pub fn new(program: Option<String>) -> Self {
        Self { program }
    }
}

#[async_trait]
impl DataAbsorber for CommandAbsorber {
    async fn absorb(&self, request: &AbsorbRequest) -> Result<()> {
        let Some(program) = &self.program else {
            tracing::warn!(
                "No absorb command configured, skipping copy of {} from {}",
                request.dataset,
                request.source_host
            );
            return Ok(());
        };

        let status = tokio::process::Command::new(program)
            .arg("--dataset")
            .arg(&request.dataset)
            .arg("--source-host")
            .arg(&request.source_host)
            .arg("--destination-host")
            .arg(&request.destination_host)
            .arg("--port")
            .arg(request.port.to_string())
            .arg("--tag")
            .arg(&request.tag)
            .status()
            .await
            .with_context(|| format!("Cannot run {}", program))?;

        if !status.success() {
            return Err(anyhow!("{} exited with {}", program, status));
        }
        Ok(())
    }
}
