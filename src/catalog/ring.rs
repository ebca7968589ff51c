//! Weighted Consistent Hashing
//!
//! Builds the continuum used to map request keys onto ring members (v1 ring
//! entries or v2 slices). Each member gets a number of synthetic points
//! proportional to its weight; a key is owned by the first point at or after
//! its checksum.
//!
//! ## Hash functions
//! - **Continuum points**: first 4 bytes (8 hex characters) of the SHA-1 digest
//!   of `"<member>:<point>"`, read big-endian.
//! - **Lookup keys**: IEEE CRC-32 of the raw key bytes.
//!
//! Both are fixed so that routing stays stable across restarts and across
//! implementations sharing the same catalog.

use sha1::{Digest, Sha1};

/// Number of continuum points allocated per declared partition.
pub const POINTS_PER_PARTITION: u32 = 160;

/// One synthetic point on the continuum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuumPoint {
    pub hash: u32,
    /// Index of the owning member in declaration order.
    pub owner: usize,
}

/// Immutable continuum built once when a catalog is loaded.
#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    owners: Vec<String>,
    continuum: Vec<ContinuumPoint>,
}

impl ConsistentHashRing {
    /// Builds the continuum for `members` (`(key, weight)` pairs).
    ///
    /// Returns `None` when fewer than 2 partitions are declared, when there are
    /// no members, or when the total weight is not positive. Callers route
    /// everything to the first member in that case.
    pub fn build<S: AsRef<str>>(members: &[(S, f64)], num_partitions: u32) -> Option<Self> {
        let total_weight: f64 = members.iter().map(|(_, weight)| *weight).sum();
        if num_partitions < 2 || members.is_empty() || total_weight <= 0.0 {
            return None;
        }

        let mut continuum = Vec::new();
        for (owner, (key, weight)) in members.iter().enumerate() {
            let points = points_for(num_partitions, *weight, total_weight);
            for point in 0..points {
                continuum.push(ContinuumPoint {
                    hash: point_hash(key.as_ref(), point),
                    owner,
                });
            }
        }

        // Stable: equal hashes keep insertion order.
        continuum.sort_by_key(|point| point.hash);

        tracing::debug!(
            "Built continuum with {} points for {} members",
            continuum.len(),
            members.len()
        );

        Some(Self {
            owners: members
                .iter()
                .map(|(key, _)| key.as_ref().to_string())
                .collect(),
            continuum,
        })
    }

    /// Returns the index of the member owning `key`.
    pub fn lookup(&self, key: &str) -> usize {
        self.lookup_hash(key_hash(key))
    }

    /// Returns the index of the member owning the given checksum.
    ///
    /// A checksum above every point resolves to the last point, not the first.
    pub fn lookup_hash(&self, hash: u32) -> usize {
        let index = self.continuum.partition_point(|point| point.hash < hash);
        let index = index.min(self.continuum.len().saturating_sub(1));
        self.continuum.get(index).map(|point| point.owner).unwrap_or(0)
    }

    /// Key of the member at `owner`.
    pub fn owner_key(&self, owner: usize) -> Option<&str> {
        self.owners.get(owner).map(String::as_str)
    }

    pub fn points(&self) -> &[ContinuumPoint] {
        &self.continuum
    }

    /// Number of points allocated to each member, in declaration order.
    pub fn points_per_owner(&self) -> Vec<usize> {
        let mut counts = vec![0; self.owners.len()];
        for point in &self.continuum {
            counts[point.owner] += 1;
        }
        counts
    }
}

/// `partitions * 160 * weight / total_weight`, truncated.
pub fn points_for(num_partitions: u32, weight: f64, total_weight: f64) -> usize {
    (f64::from(num_partitions) * f64::from(POINTS_PER_PARTITION) * weight / total_weight).floor()
        as usize
}

/// Continuum position of point `point` of member `key`.
pub fn point_hash(key: &str, point: usize) -> u32 {
    let digest = Sha1::digest(format!("{key}:{point}").as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Checksum used to place a request key on the continuum.
pub fn key_hash(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}
