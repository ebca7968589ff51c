use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// How many partitions a request fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    /// Every partition (optionally limited to a range).
    Broadcast,
    /// The single partition owning the request key.
    Scatter,
}

/// Which copies of a selected partition receive the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaSelection {
    Top,
    Random,
    All,
}

/// Inclusive bounds on the sortable range key of v1 partitions.
///
/// An absent bound is open. To pick partitions by position instead of by
/// key, see [`PartitionSlice`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl DateRange {
    pub fn contains(&self, range_key: &str) -> bool {
        let after_start = self.from.as_deref().is_none_or(|from| range_key >= from);
        let before_end = self.to.as_deref().is_none_or(|to| range_key <= to);
        after_start && before_end
    }
}

/// Positions `start..end` within each ring member's partitions, sorted by
/// range key. `end` is exclusive and an absent `end` runs to the last one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSlice {
    #[serde(default)]
    pub start: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
}

impl PartitionSlice {
    pub fn contains(&self, position: usize) -> bool {
        position >= self.start && self.end.is_none_or(|end| position < end)
    }
}

/// In-process routing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    #[serde(rename = "type")]
    pub mode: RouteMode,
    pub dataset: String,
    pub replica: ReplicaSelection,
    /// Explicit partition key; wins over the record's key field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_slice: Option<PartitionSlice>,
}

impl RouteRequest {
    /// Every copy of every partition.
    pub fn broadcast_all(dataset: &str) -> Self {
        Self {
            mode: RouteMode::Broadcast,
            dataset: dataset.to_string(),
            replica: ReplicaSelection::All,
            key: None,
            record: None,
            date_range: None,
            partition_slice: None,
        }
    }

    /// Every copy of the partition owning `record`.
    pub fn scatter_all(dataset: &str, record: Value) -> Self {
        Self {
            mode: RouteMode::Scatter,
            dataset: dataset.to_string(),
            replica: ReplicaSelection::All,
            key: None,
            record: Some(record),
            date_range: None,
            partition_slice: None,
        }
    }

    pub fn with_replica(mut self, replica: ReplicaSelection) -> Self {
        self.replica = replica;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition_slice(mut self, slice: PartitionSlice) -> Self {
        self.partition_slice = Some(slice);
        self
    }

    pub fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = Some(date_range);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("cannot scatter into {dataset}: no value for partition key {field:?}")]
    MissingPartitionKey { dataset: String, field: String },

    #[error("no destinations for {dataset}")]
    NoDestinations { dataset: String },
}
