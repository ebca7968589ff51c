//! Version 1 catalog schema.
//!
//! ```json
//! {
//!   "effective_date": "2013-09-29T00:00:00Z",
//!   "farms": { "localhost:23003/test": { "device": "." } },
//!   "zones": ["localhost:23003/test"],
//!   "datasets": {
//!     "Default": {
//!       "workers": 2,
//!       "number_of_partitions": 2,
//!       "number_of_replicas": 1,
//!       "date_range": "infinity",
//!       "partition_key": "_key",
//!       "plugins": ["groonga"],
//!       "ring": {
//!         "localhost:23041": {
//!           "weight": 50,
//!           "partitions": { "2013-09-29": ["localhost:23003/test.000"] }
//!         }
//!       }
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

const SUPPORTED_DATE_RANGES: &[&str] = &["infinity"];
const SUPPORTED_PARTITION_KEYS: &[&str] = &["_key"];

pub(crate) fn load(raw: &Value, base_path: Option<PathBuf>) -> Result<CatalogModel, CatalogError> {
    let mut validator = Validator::default();

    let effective_date = validator.date(raw.get("effective_date"), "effective_date");
    let farms = parse_farms(&mut validator, raw.get("farms"));
    let zones = parse_zones(&mut validator, raw.get("zones"));
    let datasets = parse_datasets(&mut validator, raw.get("datasets"));

    // Cross references go against every declared farm key, even ones whose
    // entry failed to parse.
    let farm_names: Option<Vec<&str>> = raw
        .get("farms")
        .and_then(Value::as_object)
        .map(|farms| farms.keys().map(String::as_str).collect());
    if let (Some(farm_names), Some(zones)) = (&farm_names, &zones) {
        check_zone_relations(&mut validator, farm_names, zones);
    }
    if let Some(farm_names) = &farm_names {
        check_partition_addresses(&mut validator, farm_names, raw.get("datasets"));
    }

    let errors = validator.into_errors();
    match (effective_date, farms, zones, datasets) {
        (Some(effective_date), Some(farms), Some(zones), Some(datasets)) if errors.is_empty() => {
            Ok(CatalogModel {
                version: CatalogVersion::V1,
                effective_date,
                farms,
                zones,
                datasets,
                raw: raw.clone(),
                base_path,
            })
        }
        _ => Err(CatalogError::Validation { errors }),
    }
}

fn parse_farms(v: &mut Validator, value: Option<&Value>) -> Option<Vec<Farm>> {
    let farms = v.required_object(value, "farms")?;
    let mut result = Vec::with_capacity(farms.len());
    for (name, farm) in farms {
        let path = format!("farms.{}", name);
        let Some(farm) = v.object(farm, &path) else {
            continue;
        };
        if let Some(device) = v.required_string(farm.get("device"), &format!("{}.device", path)) {
            result.push(Farm {
                name: name.clone(),
                device: device.to_string(),
            });
        }
    }
    Some(result)
}

fn parse_zones(v: &mut Validator, value: Option<&Value>) -> Option<Vec<String>> {
    let zones = v.required_array(value, "zones")?;
    let mut flattened = Vec::new();
    for (index, zone) in zones.iter().enumerate() {
        flatten_zone(v, zone, &format!("zones[{}]", index), &mut flattened);
    }
    Some(flattened)
}

fn flatten_zone(v: &mut Validator, zone: &Value, path: &str, out: &mut Vec<String>) {
    match zone {
        Value::String(name) => out.push(name.clone()),
        Value::Array(children) => {
            for (index, child) in children.iter().enumerate() {
                flatten_zone(v, child, &format!("{}[{}]", path, index), out);
            }
        }
        other => v.push(ValidationError::MismatchedType {
            path: path.to_string(),
            expected: "string or array".to_string(),
            actual: super::validator::type_name(other).to_string(),
        }),
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
    let partitions = v.one_or_larger_integer(
        dataset.get("number_of_partitions"),
        &format!("{}.number_of_partitions", path),
    );
    let replicas = v.one_or_larger_integer(
        dataset.get("number_of_replicas"),
        &format!("{}.number_of_replicas", path),
    );
    let workers = v.non_negative_integer(dataset.get("workers"), &format!("{}.workers", path));
    let date_range = v.one_of(
        dataset.get("date_range"),
        &format!("{}.date_range", path),
        SUPPORTED_DATE_RANGES,
    );
    let partition_key = parse_partition_key(v, dataset.get("partition_key"), path);
    let members = parse_ring(v, dataset.get("ring"), &format!("{}.ring", path));
    let plugins = v.string_list(dataset.get("plugins"), &format!("{}.plugins", path));

    let (partitions, replicas, workers, date_range, partition_key, members, plugins) = (
        partitions?,
        replicas?,
        workers?,
        date_range?,
        partition_key?,
        members?,
        plugins?,
    );

    let number_of_partitions = u32::try_from(partitions).unwrap_or(u32::MAX);
    let weights: Vec<(&str, f64)> = members
        .iter()
        .map(|member| (member.name.as_str(), member.weight))
        .collect();
    let total_weight: f64 = weights.iter().map(|(_, weight)| weight).sum();
    if number_of_partitions >= 2 && total_weight <= 0.0 {
        v.push(ValidationError::ZeroTotalWeight {
            path: format!("{}.ring", path),
        });
        return None;
    }
    let continuum = ConsistentHashRing::build(&weights, number_of_partitions);

    let mut hosts = Vec::new();
    for member in &members {
        for partition in &member.partitions {
            for address in &partition.addresses {
                push_unique(&mut hosts, address_host(address));
            }
        }
    }

    Some(Dataset {
        name: name.to_string(),
        workers: u32::try_from(workers).unwrap_or(u32::MAX),
        plugins,
        hosts,
        layout: DatasetLayout::Ring(RingLayout {
            number_of_partitions,
            number_of_replicas: u32::try_from(replicas).unwrap_or(u32::MAX),
            date_range,
            partition_key,
            members,
            continuum,
        }),
    })
}

fn parse_partition_key(v: &mut Validator, value: Option<&Value>, path: &str) -> Option<String> {
    let path = format!("{}.partition_key", path);
    v.required_string(value, &path)?;
    v.one_of(value, &path, SUPPORTED_PARTITION_KEYS)
}

fn parse_ring(v: &mut Validator, value: Option<&Value>, path: &str) -> Option<Vec<RingMember>> {
    let ring = v.required_object(value, path)?;
    let mut members = Vec::with_capacity(ring.len());
    let mut valid = true;
    for (key, member) in ring {
        let member_path = format!("{}.{}", path, key);
        match parse_ring_member(v, key, member, &member_path) {
            Some(member) => members.push(member),
            None => valid = false,
        }
    }
    valid.then_some(members)
}

fn parse_ring_member(
    v: &mut Validator,
    key: &str,
    member: &Value,
    path: &str,
) -> Option<RingMember> {
    let member = v.object(member, path)?;
    let weight = v.non_negative_number(member.get("weight"), &format!("{}.weight", path));

    let partitions_path = format!("{}.partitions", path);
    let partitions = v
        .required_object(member.get("partitions"), &partitions_path)
        .and_then(|partitions| parse_partitions(v, partitions, &partitions_path));

    Some(RingMember {
        name: key.to_string(),
        weight: weight?,
        partitions: partitions?,
    })
}

fn parse_partitions(
    v: &mut Validator,
    partitions: &Map<String, Value>,
    path: &str,
) -> Option<Vec<RangePartition>> {
    let mut result = Vec::with_capacity(partitions.len());
    let mut valid = true;
    for (range, addresses) in partitions {
        let range_path = format!("{}.{}", path, range);
        let Some(addresses) = v.array(addresses, &range_path) else {
            valid = false;
            continue;
        };
        let mut parsed = Vec::with_capacity(addresses.len());
        for (index, address) in addresses.iter().enumerate() {
            match v.string(address, &format!("{}[{}]", range_path, index)) {
                Some(address) => parsed.push(address.to_string()),
                None => valid = false,
            }
        }
        result.push(RangePartition {
            range: range.clone(),
            addresses: parsed,
        });
    }
    result.sort_by(|a, b| a.range.cmp(&b.range));
    valid.then_some(result)
}

/// Every farm must sit in some zone and every zone entry must be a farm.
fn check_zone_relations(v: &mut Validator, farms: &[&str], zones: &[String]) {
    for farm in farms {
        if !zones.iter().any(|zone| zone == farm) {
            v.push(ValidationError::FarmNotZoned {
                farm: farm.to_string(),
            });
        }
    }
    for zone in zones {
        if !farms.iter().any(|farm| farm == zone) {
            v.push(ValidationError::UnknownFarmInZones { farm: zone.clone() });
        }
    }
}

/// Every partition address must be `<farm>.<database>` for a declared farm.
///
/// Runs over the raw description so that addresses inside otherwise broken
/// datasets are still reported.
fn check_partition_addresses(v: &mut Validator, farms: &[&str], datasets: Option<&Value>) {
    let Some(datasets) = datasets.and_then(Value::as_object) else {
        return;
    };
    for (dataset_name, dataset) in datasets {
        let Some(ring) = dataset.get("ring").and_then(Value::as_object) else {
            continue;
        };
        for (ring_key, member) in ring {
            let Some(partitions) = member.get("partitions").and_then(Value::as_object) else {
                continue;
            };
            for (range, addresses) in partitions {
                let Some(addresses) = addresses.as_array() else {
                    continue;
                };
                for (index, address) in addresses.iter().enumerate() {
                    let Some(address) = address.as_str() else {
                        continue;
                    };
                    let path = format!(
                        "datasets.{}.ring.{}.partitions.{}[{}]",
                        dataset_name, ring_key, range, index
                    );
                    check_address(v, farms, address, path);
                }
            }
        }
    }
}

fn check_address(v: &mut Validator, farms: &[&str], address: &str, path: String) {
    let database = farms.iter().find_map(|farm| {
        address
            .strip_prefix(farm)
            .and_then(|rest| rest.strip_prefix('.'))
    });
    match database {
        None => v.push(ValidationError::UnknownFarmForPartition {
            path,
            address: address.to_string(),
        }),
        Some("") => v.push(ValidationError::MissingDatabaseName {
            path,
            address: address.to_string(),
        }),
        Some(_) => {}
    }
}
