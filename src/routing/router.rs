//! Destination resolution.
//!
//! Turns a `RouteRequest` into the ordered list of addresses it must be sent
//! to, using the continuum the catalog built for the dataset.

use super::types::*;
use crate::catalog::{CatalogModel, Dataset, DatasetLayout, Replica, RingLayout};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};

pub struct Router {
    rng: Mutex<StdRng>,
}

impl Router {
    /// Router whose random replica selection is seeded from the OS.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Router with reproducible random replica selection.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Resolves `request` against `catalog`.
    ///
    /// Never returns an empty list: a request that reaches no partition is a
    /// `RoutingError::NoDestinations`.
    pub fn route(
        &self,
        catalog: &CatalogModel,
        request: &RouteRequest,
    ) -> Result<Vec<String>, RoutingError> {
        let dataset = catalog
            .dataset(&request.dataset)
            .ok_or_else(|| RoutingError::UnknownDataset(request.dataset.clone()))?;

        let routes = match &dataset.layout {
            DatasetLayout::Ring(ring) => self.route_ring(dataset, ring, request)?,
            DatasetLayout::Replicas(replicas) => self.route_replicas(dataset, replicas, request)?,
        };

        if routes.is_empty() {
            return Err(RoutingError::NoDestinations {
                dataset: dataset.name.clone(),
            });
        }
        tracing::debug!(
            "Routed {:?} request for {} to {} destinations",
            request.mode,
            dataset.name,
            routes.len()
        );
        Ok(routes)
    }

    fn route_ring(
        &self,
        dataset: &Dataset,
        ring: &RingLayout,
        request: &RouteRequest,
    ) -> Result<Vec<String>, RoutingError> {
        let members = match request.mode {
            RouteMode::Broadcast => ring.members.iter().collect(),
            RouteMode::Scatter => {
                let key = partition_key_value(dataset, &ring.partition_key, request)?;
                ring.member_for(&key).into_iter().collect::<Vec<_>>()
            }
        };

        let mut routes = Vec::new();
        for member in members {
            for (position, partition) in member.partitions.iter().enumerate() {
                let in_range = request
                    .date_range
                    .as_ref()
                    .is_none_or(|range| range.contains(&partition.range))
                    && request
                        .partition_slice
                        .is_none_or(|slice| slice.contains(position));
                if in_range {
                    self.select_addresses(&partition.addresses, request.replica, &mut routes);
                }
            }
        }
        Ok(routes)
    }

    fn route_replicas(
        &self,
        dataset: &Dataset,
        replicas: &[Replica],
        request: &RouteRequest,
    ) -> Result<Vec<String>, RoutingError> {
        let mut routes = Vec::new();
        for replica in self.select_replicas(replicas, request.replica) {
            match request.mode {
                RouteMode::Broadcast => {
                    routes.extend(
                        replica
                            .sorted_slices()
                            .into_iter()
                            .map(|slice| slice.address.clone()),
                    );
                }
                RouteMode::Scatter => {
                    let key = partition_key_value(dataset, &replica.dimension, request)?;
                    if let Some(slice) = replica.slice_for(&key) {
                        routes.push(slice.address.clone());
                    }
                }
            }
        }
        Ok(routes)
    }

    fn select_replicas<'a>(
        &self,
        replicas: &'a [Replica],
        selection: ReplicaSelection,
    ) -> Vec<&'a Replica> {
        match selection {
            ReplicaSelection::Top => replicas.first().into_iter().collect(),
            ReplicaSelection::Random => self.pick(replicas).into_iter().collect(),
            ReplicaSelection::All => replicas.iter().collect(),
        }
    }

    fn select_addresses(
        &self,
        addresses: &[String],
        selection: ReplicaSelection,
        routes: &mut Vec<String>,
    ) {
        match selection {
            ReplicaSelection::Top => routes.extend(addresses.first().cloned()),
            ReplicaSelection::Random => routes.extend(self.pick(addresses).cloned()),
            ReplicaSelection::All => routes.extend(addresses.iter().cloned()),
        }
    }

    fn pick<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        items.get(rng.gen_range(0..items.len()))
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Key used to place a scattered request: the explicit override, else the
/// record's `field`.
fn partition_key_value(
    dataset: &Dataset,
    field: &str,
    request: &RouteRequest,
) -> Result<String, RoutingError> {
    if let Some(key) = &request.key {
        return Ok(key.clone());
    }
    match request.record.as_ref().and_then(|record| record.get(field)) {
        Some(Value::String(key)) => Ok(key.clone()),
        Some(Value::Null) | None => Err(RoutingError::MissingPartitionKey {
            dataset: dataset.name.clone(),
            field: field.to_string(),
        }),
        Some(other) => Ok(other.to_string()),
    }
}
