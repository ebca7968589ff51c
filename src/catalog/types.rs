use super::ring::ConsistentHashRing;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Schema version of the catalog description the model was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CatalogVersion {
    V1,
    V2,
}

/// A storage host (v1 `farms` entry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Farm {
    pub name: String,
    pub device: String,
}

/// Validated, immutable view of a catalog description.
///
/// Built once per load. Changes produce a new model (see
/// [`CatalogModel::with_replica_hosts`]) that is swapped in as a whole.
#[derive(Debug, Clone)]
pub struct CatalogModel {
    pub(crate) version: CatalogVersion,
    pub(crate) effective_date: DateTime<Utc>,
    pub(crate) farms: Vec<Farm>,
    pub(crate) zones: Vec<String>,
    pub(crate) datasets: Vec<Dataset>,
    pub(crate) raw: Value,
    pub(crate) base_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub workers: u32,
    pub plugins: Vec<String>,
    /// Hosts currently serving this dataset, in declaration order, without duplicates.
    pub hosts: Vec<String>,
    pub layout: DatasetLayout,
}

/// Physical layout of a dataset; one variant per schema version.
#[derive(Debug, Clone)]
pub enum DatasetLayout {
    /// v1: weighted ring members, each holding range-keyed partitions.
    Ring(RingLayout),
    /// v2: explicit replicas, each holding weighted slices.
    Replicas(Vec<Replica>),
}

#[derive(Debug, Clone)]
pub struct RingLayout {
    pub number_of_partitions: u32,
    pub number_of_replicas: u32,
    pub date_range: String,
    pub partition_key: String,
    pub members: Vec<RingMember>,
    pub continuum: Option<ConsistentHashRing>,
}

#[derive(Debug, Clone)]
pub struct RingMember {
    pub name: String,
    pub weight: f64,
    /// Sorted ascending by range key.
    pub partitions: Vec<RangePartition>,
}

/// Addresses holding one range bucket (e.g. a time bucket) of a ring member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePartition {
    pub range: String,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Replica {
    /// Record field hashed to pick a slice.
    pub dimension: String,
    pub slices: Vec<Slice>,
    pub continuum: Option<ConsistentHashRing>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub label: String,
    pub weight: f64,
    pub address: String,
}

/// A database a node has to serve locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalSlice {
    pub address: String,
    pub dataset: String,
    pub database: PathBuf,
    pub workers: u32,
    pub plugins: Vec<String>,
}

impl CatalogModel {
    pub fn version(&self) -> CatalogVersion {
        self.version
    }

    pub fn effective_date(&self) -> DateTime<Utc> {
        self.effective_date
    }

    pub fn farms(&self) -> &[Farm] {
        &self.farms
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|dataset| dataset.name == name)
    }

    /// First dataset served by `host`.
    pub fn dataset_for_host(&self, host: &str) -> Option<&Dataset> {
        self.datasets
            .iter()
            .find(|dataset| dataset.hosts.iter().any(|candidate| candidate == host))
    }

    /// The description the model was loaded from.
    pub fn to_json(&self) -> &Value {
        &self.raw
    }

    /// Directory relative database paths are resolved against.
    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    /// Every node of the cluster, sorted.
    pub fn all_nodes(&self) -> Vec<String> {
        let mut nodes = match self.version {
            CatalogVersion::V1 => self.zones.clone(),
            CatalogVersion::V2 => self
                .datasets
                .iter()
                .flat_map(|dataset| dataset.addresses())
                .map(|address| split_address(&address).0.to_string())
                .collect(),
        };
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// Databases the node `farm` (`host:port/tag`) must open.
    pub fn slices_for(&self, farm: &str) -> Vec<LocalSlice> {
        let device = match self.version {
            CatalogVersion::V1 => match self.farms.iter().find(|f| f.name == farm) {
                Some(found) => found.device.clone(),
                None => return Vec::new(),
            },
            CatalogVersion::V2 => ".".to_string(),
        };
        let prefix = format!("{}.", farm);

        let mut results: Vec<LocalSlice> = Vec::new();
        for dataset in &self.datasets {
            for address in dataset.addresses() {
                let Some(database) = address.strip_prefix(&prefix) else {
                    continue;
                };
                if results.iter().any(|slice| slice.address == address) {
                    continue;
                }
                let path = Path::new(&device).join(database).join("db");
                results.push(LocalSlice {
                    database: self.resolve(&path),
                    address,
                    dataset: dataset.name.clone(),
                    workers: dataset.workers,
                    plugins: dataset.plugins.clone(),
                });
            }
        }
        results
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl Dataset {
    /// Record field used as the partition key.
    pub fn partition_key(&self) -> &str {
        match &self.layout {
            DatasetLayout::Ring(ring) => &ring.partition_key,
            DatasetLayout::Replicas(replicas) => replicas
                .first()
                .map(|replica| replica.dimension.as_str())
                .unwrap_or(DEFAULT_DIMENSION),
        }
    }

    pub fn partition_count(&self) -> usize {
        match &self.layout {
            DatasetLayout::Ring(ring) => ring.number_of_partitions as usize,
            DatasetLayout::Replicas(replicas) => replicas
                .first()
                .map(|replica| replica.slices.len())
                .unwrap_or(0),
        }
    }

    pub fn replica_count(&self) -> usize {
        match &self.layout {
            DatasetLayout::Ring(ring) => ring.number_of_replicas as usize,
            DatasetLayout::Replicas(replicas) => replicas.len(),
        }
    }

    /// Every address of the dataset, in declaration order.
    pub fn addresses(&self) -> Vec<String> {
        match &self.layout {
            DatasetLayout::Ring(ring) => ring
                .members
                .iter()
                .flat_map(|member| member.partitions.iter())
                .flat_map(|partition| partition.addresses.iter().cloned())
                .collect(),
            DatasetLayout::Replicas(replicas) => replicas
                .iter()
                .flat_map(|replica| replica.slices.iter())
                .map(|slice| slice.address.clone())
                .collect(),
        }
    }
}

impl RingLayout {
    /// Ring member owning `key`.
    pub fn member_for(&self, key: &str) -> Option<&RingMember> {
        match &self.continuum {
            Some(continuum) => self.members.get(continuum.lookup(key)),
            None => self.members.first(),
        }
    }
}

impl Replica {
    /// Slice owning `key`.
    pub fn slice_for(&self, key: &str) -> Option<&Slice> {
        match &self.continuum {
            Some(continuum) => self.slices.get(continuum.lookup(key)),
            None => self.slices.first(),
        }
    }

    /// Slices ordered by label.
    pub fn sorted_slices(&self) -> Vec<&Slice> {
        let mut slices: Vec<&Slice> = self.slices.iter().collect();
        slices.sort_by(|a, b| a.label.cmp(&b.label));
        slices
    }
}

pub(crate) const DEFAULT_DIMENSION: &str = "_key";

/// Host part of an address (`host:port/tag.db` -> `host`).
pub fn address_host(address: &str) -> &str {
    let end = address
        .find(':')
        .or_else(|| address.find('/'))
        .unwrap_or(address.len());
    &address[..end]
}

/// Same address served by another host.
pub fn replace_address_host(address: &str, host: &str) -> String {
    let rest = &address[address_host(address).len()..];
    format!("{}{}", host, rest)
}

/// Splits `host:port/tag.db` into (`host:port/tag`, `db`).
pub fn split_address(address: &str) -> (&str, &str) {
    let search_from = address.rfind('/').unwrap_or(0);
    match address[search_from..].find('.') {
        Some(offset) => {
            let dot = search_from + offset;
            (&address[..dot], &address[dot + 1..])
        }
        None => (address, ""),
    }
}

/// Appends `item` unless already present.
pub(crate) fn push_unique(items: &mut Vec<String>, item: &str) {
    if !items.iter().any(|existing| existing == item) {
        items.push(item.to_string());
    }
}
