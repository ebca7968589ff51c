//! Version 2 catalog schema.
//!
//! ```json
//! {
//!   "version": 2,
//!   "effectiveDate": "2014-02-28T00:00:00Z",
//!   "datasets": {
//!     "Default": {
//!       "nWorkers": 4,
//!       "plugins": ["groonga", "crud", "search"],
//!       "replicas": [
//!         {
//!           "dimension": "_key",
//!           "slices": [
//!             { "label": "slice000", "weight": 50, "volume": { "address": "127.0.0.1:10031/droonga.000" } }
//!           ]
//!         }
//!       ]
//!     }
//!   }
//! }
//! ```

use super::error::{CatalogError, ValidationError};
use super::ring::ConsistentHashRing;
use super::types::*;
use super::validator::Validator;

use serde_json::{Map, Value};
use std::path::PathBuf;

const DEFAULT_WEIGHT: f64 = 1.0;

pub(crate) fn load(raw: &Value, base_path: Option<PathBuf>) -> Result<CatalogModel, CatalogError> {
    let mut validator = Validator::default();

    let effective_date = validator.date(raw.get("effectiveDate"), "effectiveDate");
    let datasets = parse_datasets(&mut validator, raw.get("datasets"));

    let errors = validator.into_errors();
    match (effective_date, datasets) {
        (Some(effective_date), Some(datasets)) if errors.is_empty() => Ok(CatalogModel {
            version: CatalogVersion::V2,
            effective_date,
            farms: Vec::new(),
            zones: Vec::new(),
            datasets,
            raw: raw.clone(),
            base_path,
        }),
        _ => Err(CatalogError::Validation { errors }),
    }
}

fn parse_datasets(v: &mut Validator, value: Option<&Value>) -> Option<Vec<Dataset>> {
    let datasets = v.required_object(value, "datasets")?;
    let mut result = Vec::with_capacity(datasets.len());
    for (name, dataset) in datasets {
        let path = format!("datasets.{}", name);
        let Some(dataset) = v.object(dataset, &path) else {
            continue;
        };
        if let Some(parsed) = parse_dataset(v, name, dataset, &path) {
            result.push(parsed);
        }
    }
    Some(result)
}

fn parse_dataset(
    v: &mut Validator,
    name: &str,
    dataset: &Map<String, Value>,
    path: &str,
) -> Option<Dataset> {
    let workers = match dataset.get("nWorkers") {
        None => Some(0),
        value => v.non_negative_integer(value, &format!("{}.nWorkers", path)),
    };
    let plugins = v.string_list(dataset.get("plugins"), &format!("{}.plugins", path));
    let replicas = parse_replicas(v, dataset.get("replicas"), &format!("{}.replicas", path));

    let (workers, plugins, replicas) = (workers?, plugins?, replicas?);

    let mut hosts = Vec::new();
    for replica in &replicas {
        for slice in &replica.slices {
            push_unique(&mut hosts, address_host(&slice.address));
        }
    }

    Some(Dataset {
        name: name.to_string(),
        workers: u32::try_from(workers).unwrap_or(u32::MAX),
        plugins,
        hosts,
        layout: DatasetLayout::Replicas(replicas),
    })
}

fn parse_replicas(v: &mut Validator, value: Option<&Value>, path: &str) -> Option<Vec<Replica>> {
    let replicas = v.required_array(value, path)?;
    if replicas.is_empty() {
        v.push(ValidationError::SmallerThanOne {
            path: path.to_string(),
            value: 0,
        });
        return None;
    }

    let mut result = Vec::with_capacity(replicas.len());
    let mut valid = true;
    for (index, replica) in replicas.iter().enumerate() {
        match parse_replica(v, replica, &format!("{}[{}]", path, index)) {
            Some(replica) => result.push(replica),
            None => valid = false,
        }
    }
    valid.then_some(result)
}

fn parse_replica(v: &mut Validator, replica: &Value, path: &str) -> Option<Replica> {
    let replica = v.object(replica, path)?;

    let dimension = match replica.get("dimension") {
        None => Some(DEFAULT_DIMENSION),
        Some(value) => v.string(value, &format!("{}.dimension", path)),
    };

    let slices_path = format!("{}.slices", path);
    let slices = v
        .required_array(replica.get("slices"), &slices_path)
        .and_then(|slices| parse_slices(v, slices, &slices_path));

    let (dimension, slices) = (dimension?, slices?);

    let weights: Vec<(&str, f64)> = slices
        .iter()
        .map(|slice| (slice.label.as_str(), slice.weight))
        .collect();
    let n_slices = u32::try_from(slices.len()).unwrap_or(u32::MAX);
    let total_weight: f64 = weights.iter().map(|(_, weight)| weight).sum();
    if n_slices >= 2 && total_weight <= 0.0 {
        v.push(ValidationError::ZeroTotalWeight { path: slices_path });
        return None;
    }
    let continuum = ConsistentHashRing::build(&weights, n_slices);

    Some(Replica {
        dimension: dimension.to_string(),
        slices,
        continuum,
    })
}

fn parse_slices(v: &mut Validator, slices: &[Value], path: &str) -> Option<Vec<Slice>> {
    if slices.is_empty() {
        v.push(ValidationError::SmallerThanOne {
            path: path.to_string(),
            value: 0,
        });
        return None;
    }

    let mut result = Vec::with_capacity(slices.len());
    let mut valid = true;
    for (index, slice) in slices.iter().enumerate() {
        match parse_slice(v, index, slice, &format!("{}[{}]", path, index)) {
            Some(slice) => result.push(slice),
            None => valid = false,
        }
    }
    valid.then_some(result)
}

fn parse_slice(v: &mut Validator, index: usize, slice: &Value, path: &str) -> Option<Slice> {
    let slice = v.object(slice, path)?;

    let weight = match slice.get("weight") {
        None => Some(DEFAULT_WEIGHT),
        value => v.non_negative_number(value, &format!("{}.weight", path)),
    };
    let label = match slice.get("label") {
        None => Some(format!("slice{:03}", index)),
        Some(value) => v
            .string(value, &format!("{}.label", path))
            .map(str::to_string),
    };

    let volume_path = format!("{}.volume", path);
    let address_path = format!("{}.address", volume_path);
    let address = v
        .required_object(slice.get("volume"), &volume_path)
        .and_then(|volume| v.required_string(volume.get("address"), &address_path))
        .and_then(|address| {
            if split_address(address).1.is_empty() {
                v.push(ValidationError::MissingDatabaseName {
                    path: address_path.clone(),
                    address: address.to_string(),
                });
                None
            } else {
                Some(address.to_string())
            }
        });

    Some(Slice {
        label: label?,
        weight: weight?,
        address: address?,
    })
}

impl CatalogModel {
    /// Returns a new model whose `dataset` is served by exactly `hosts`.
    ///
    /// The first replica is the template: every host gets one replica with
    /// the same slices, addresses rewritten to that host. Only version 2
    /// catalogs carry replicas explicitly, so v1 catalogs are rejected.
    pub fn with_replica_hosts(
        &self,
        dataset: &str,
        hosts: &[String],
    ) -> Result<CatalogModel, CatalogError> {
        if self.version != CatalogVersion::V2 {
            return Err(CatalogError::Unsupported(
                "replica hosts can only be changed in a version 2 catalog".to_string(),
            ));
        }

        let mut raw = self.raw.clone();
        let replicas = raw
            .get_mut("datasets")
            .and_then(|datasets| datasets.get_mut(dataset))
            .and_then(|dataset| dataset.get_mut("replicas"))
            .and_then(Value::as_array_mut)
            .ok_or_else(|| CatalogError::UnknownDataset(dataset.to_string()))?;
        let template = replicas
            .first()
            .cloned()
            .ok_or_else(|| CatalogError::UnknownDataset(dataset.to_string()))?;

        let mut unique_hosts: Vec<String> = Vec::new();
        for host in hosts {
            push_unique(&mut unique_hosts, host);
        }

        *replicas = unique_hosts
            .iter()
            .map(|host| replica_for_host(&template, host))
            .collect();

        super::loader::load_with_base(&raw, self.base_path.clone())
    }
}

fn replica_for_host(template: &Value, host: &str) -> Value {
    let mut replica = template.clone();
    if let Some(slices) = replica.get_mut("slices").and_then(Value::as_array_mut) {
        for slice in slices {
            if let Some(address) = slice.pointer_mut("/volume/address")
                && let Some(current) = address.as_str()
            {
                *address = Value::String(replace_address_host(current, host));
            }
        }
    }
    replica
}
