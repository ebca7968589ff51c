//! Membership Control Service
//!
//! Executes control operations sent by the external membership service.
//!
//! ## Responsibilities
//! - **Targeting**: a command naming another `node` is acknowledged and ignored.
//! - **Catalog changes**: replica host lists change through `CatalogStore::modify`,
//!   so a failed change leaves the current catalog in place.
//! - **Absorb**: copying data from a source node runs `Idle -> Absorbing -> Ready`,
//!   waiting on a readiness probe instead of fixed sleeps.
//! - **Trail**: every response carries a log of what was done.

use super::absorb::{AbsorbTracker, wait_until_ready};
use super::status::{ABSORBING, NodeStatusStore, ROLE};
use super::types::*;
use crate::catalog::types::push_unique;
use crate::catalog::{self, CatalogStore, split_address};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Link to the cluster membership service.
#[async_trait]
pub trait ClusterAgent: Send + Sync {
    async fn join(&self, hosts: &[String]) -> Result<()>;
    async fn live_nodes(&self) -> Result<Vec<String>>;
}

/// Fetches the catalog a source node is serving.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch(&self, source: &NodeName, dataset: &str) -> Result<Value>;
}

/// Copies a dataset's records from one host to another.
#[async_trait]
pub trait DataAbsorber: Send + Sync {
    async fn absorb(&self, request: &AbsorbRequest) -> Result<()>;
}

/// Asks a node whether it serves `dataset` with exactly `hosts`.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self, node: &NodeName, dataset: &str, hosts: &[String]) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsorbRequest {
    pub dataset: String,
    pub source_host: String,
    pub destination_host: String,
    pub port: u16,
    pub tag: String,
}

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub absorb_poll_interval: Duration,
    pub absorb_deadline: Duration,
    /// File `update_live_nodes` writes the live node list to.
    pub live_nodes_path: PathBuf,
}

pub struct Collaborators {
    pub agent: Arc<dyn ClusterAgent>,
    pub fetcher: Arc<dyn CatalogFetcher>,
    pub absorber: Arc<dyn DataAbsorber>,
    pub probe: Arc<dyn ReadinessProbe>,
}

pub struct ControlService {
    node: NodeName,
    catalog: Arc<CatalogStore>,
    status: Arc<NodeStatusStore>,
    tracker: Mutex<AbsorbTracker>,
    collaborators: Collaborators,
    config: ControlConfig,
}

impl ControlService {
    pub fn new(
        node: NodeName,
        catalog: Arc<CatalogStore>,
        status: Arc<NodeStatusStore>,
        collaborators: Collaborators,
        config: ControlConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            node,
            catalog,
            status,
            tracker: Mutex::new(AbsorbTracker::new()),
            collaborators,
            config,
        })
    }

    pub fn node(&self) -> &NodeName {
        &self.node
    }

    pub fn status_store(&self) -> &Arc<NodeStatusStore> {
        &self.status
    }

    pub fn absorb_state(&self) -> AbsorbState {
        self.tracker().state().clone()
    }

    /// Runs command `name` with `params`.
    ///
    /// Only an unknown command name is an error. Missing or invalid parameters
    /// and failures along the way are reported in the log trail and leave the
    /// catalog and host lists as they were.
    pub async fn handle(&self, name: &str, params: &Value) -> Result<ControlResponse, ControlError> {
        let mut response = ControlResponse::default();
        response.log(format!("{}: params = {}", name, params));

        if let Some(target) = params.get("node").and_then(Value::as_str)
            && target != self.node.to_string()
        {
            response.log(format!("not for me ({}), skipping", target));
            return Ok(response);
        }

        let command = match ControlCommand::parse(name, params) {
            Ok(command) => command,
            Err(error @ ControlError::UnknownCommand(_)) => return Err(error),
            Err(error) => {
                tracing::warn!("Ignoring {}: {}", name, error);
                response.log(format!("ignored: {}", error));
                return Ok(response);
            }
        };

        if let Err(error) = self.process(command, &mut response).await {
            tracing::error!("Control command {} failed: {}", name, error);
            response.log(format!("failed: {}", error));
        }
        Ok(response)
    }

    async fn process(
        &self,
        command: ControlCommand,
        response: &mut ControlResponse,
    ) -> Result<(), ControlError> {
        match command {
            ControlCommand::ChangeRole { role } => {
                self.status.set(ROLE, Value::String(role.clone())).await?;
                response.log(format!("role = {}", role));
            }
            ControlCommand::ReportStatus { key } => {
                response.value = self.status.get(&key).await;
            }
            ControlCommand::Join {
                source,
                dataset,
                copy,
                ..
            } => self.join_as_replica(&source, &dataset, copy, response).await?,
            ControlCommand::AbsorbData {
                source,
                dataset,
                port,
                tag,
            } => self.absorb_data(&source, dataset, port, tag, response).await?,
            ControlCommand::SetReplicas { dataset, hosts } => {
                response.log(format!("new replicas: {}", hosts.join(",")));
                self.catalog
                    .modify(|current| current.with_replica_hosts(&dataset, &hosts))?;
                self.collaborators.agent.join(&hosts).await?;
            }
            ControlCommand::AddReplicas { dataset, hosts } => {
                let added: Vec<String> = hosts
                    .into_iter()
                    .filter(|host| host != &self.node.host)
                    .collect();
                response.log(format!("adding replicas: {}", added.join(",")));
                if added.is_empty() {
                    return Ok(());
                }
                self.add_hosts(&dataset, &added)?;
                self.collaborators.agent.join(&added).await?;
            }
            ControlCommand::RemoveReplicas { dataset, hosts } => {
                response.log(format!("removing replicas: {}", hosts.join(",")));
                self.catalog.modify(|current| {
                    let remaining: Vec<String> = current_hosts(current, &dataset)?
                        .into_iter()
                        .filter(|host| !hosts.contains(host))
                        .collect();
                    current.with_replica_hosts(&dataset, &remaining)
                })?;
            }
            ControlCommand::UpdateLiveNodes => {
                let nodes = self.collaborators.agent.live_nodes().await?;
                let contents = serde_json::to_string_pretty(&nodes).map_err(anyhow::Error::from)?;
                write_file(&self.config.live_nodes_path, &contents).await?;
                response.log(format!("live nodes: {}", nodes.join(",")));
                response.value = Some(Value::from(nodes));
            }
        }
        Ok(())
    }

    async fn join_as_replica(
        &self,
        source: &NodeName,
        dataset: &str,
        copy: bool,
        response: &mut ControlResponse,
    ) -> Result<(), ControlError> {
        response.log(format!("source_node = {}", source));

        let raw = self.collaborators.fetcher.fetch(source, dataset).await?;
        let fetched = catalog::load(&raw)?;

        let other_hosts = fetched
            .dataset_for_host(&source.host)
            .or_else(|| fetched.dataset_for_host(&self.node.host))
            .map(|found| found.hosts.clone())
            .unwrap_or_default();
        response.log(format!("other_hosts = {}", other_hosts.join(",")));
        if other_hosts.is_empty() {
            return Ok(());
        }

        self.catalog.replace(fetched)?;

        if copy {
            response.log(format!("starting to copy data from {}", source.host));
            self.catalog.modify(|current| {
                current.with_replica_hosts(dataset, std::slice::from_ref(&self.node.host))
            })?;
            self.run_absorb(
                AbsorbRequest {
                    dataset: dataset.to_string(),
                    source_host: source.host.clone(),
                    destination_host: self.node.host.clone(),
                    port: source.port,
                    tag: source.tag.clone(),
                },
                true,
            )
            .await?;
        }

        response.log("joining to the cluster: update myself");
        self.add_hosts(dataset, &other_hosts)?;
        self.collaborators.agent.join(&other_hosts).await?;
        Ok(())
    }

    async fn absorb_data(
        &self,
        source: &str,
        dataset: Option<String>,
        port: Option<u16>,
        tag: Option<String>,
        response: &mut ControlResponse,
    ) -> Result<(), ControlError> {
        response.log(format!("start to absorb data from {}", source));

        let (dataset, port, tag) = match (dataset, port, tag) {
            (Some(dataset), Some(port), Some(tag)) => (dataset, port, tag),
            _ => {
                let current = self.catalog.current();
                let Some(found) = current.dataset_for_host(source) else {
                    response.log(format!("no dataset is served by {}", source));
                    return Ok(());
                };
                let Some(node) = found
                    .addresses()
                    .first()
                    .and_then(|address| split_address(address).0.parse::<NodeName>().ok())
                else {
                    response.log(format!("cannot derive port and tag for {}", found.name));
                    return Ok(());
                };
                (found.name.clone(), node.port, node.tag)
            }
        };

        response.log(format!("dataset = {}", dataset));
        response.log(format!("port    = {}", port));
        response.log(format!("tag     = {}", tag));

        self.run_absorb(
            AbsorbRequest {
                dataset,
                source_host: source.to_string(),
                destination_host: self.node.host.clone(),
                port,
                tag,
            },
            false,
        )
        .await
    }

    /// Copies data, optionally waiting first until this node serves only itself.
    async fn run_absorb(&self, request: AbsorbRequest, await_ready: bool) -> Result<(), ControlError> {
        self.tracker()
            .begin(&request.dataset, &request.source_host)?;

        if await_ready {
            let hosts = vec![self.node.host.clone()];
            let probe = &self.collaborators.probe;
            let ready = wait_until_ready(
                self.config.absorb_poll_interval,
                self.config.absorb_deadline,
                || probe.is_ready(&self.node, &request.dataset, &hosts),
            )
            .await;
            if !ready {
                self.tracker().reset();
                return Err(ControlError::NotReady {
                    node: self.node.to_string(),
                    waited: self.config.absorb_deadline,
                });
            }
        }

        if let Err(error) = self.status.set(ABSORBING, Value::Bool(true)).await {
            self.tracker().reset();
            return Err(error.into());
        }

        let result = self.collaborators.absorber.absorb(&request).await;
        match &result {
            Ok(()) => {
                self.tracker().finish();
                tracing::info!(
                    "Absorbed {} from {} into {}",
                    request.dataset,
                    request.source_host,
                    request.destination_host
                );
            }
            Err(_) => self.tracker().reset(),
        }

        // The tracker is settled, a failure here only leaves a stale marker
        let cleared = self.status.delete(ABSORBING).await;
        if let Err(error) = &cleared {
            tracing::warn!("Cannot clear {} marker: {}", ABSORBING, error);
        }
        result?;
        cleared?;
        Ok(())
    }

    /// Appends `hosts` to the dataset's replica hosts, skipping ones already present.
    fn add_hosts(&self, dataset: &str, hosts: &[String]) -> Result<(), ControlError> {
        self.catalog.modify(|current| {
            let mut merged = current_hosts(current, dataset)?;
            for host in hosts {
                push_unique(&mut merged, host);
            }
            current.with_replica_hosts(dataset, &merged)
        })?;
        Ok(())
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, AbsorbTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn current_hosts(
    current: &catalog::CatalogModel,
    dataset: &str,
) -> Result<Vec<String>, catalog::CatalogError> {
    current
        .dataset(dataset)
        .map(|found| found.hosts.clone())
        .ok_or_else(|| catalog::CatalogError::UnknownDataset(dataset.to_string()))
}

async fn write_file(path: &std::path::Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temporary = path.with_extension("tmp");
    tokio::fs::write(&temporary, contents).await?;
    tokio::fs::rename(&temporary, path).await?;
    Ok(())
}
