//! Catalog error taxonomy.
//!
//! Validation never stops at the first problem: every independent check runs
//! and the loader hands back one `CatalogError::Validation` holding all of them.

use std::path::PathBuf;
use thiserror::Error;

/// A single problem found while validating a catalog description.
///
/// `path` is the dotted JSON path of the offending field
/// (e.g. `datasets.logs.ring.a.weight`).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{path}: required parameter is missing")]
    MissingRequiredParameter { path: String },

    #[error("{path}: expected {expected}, got {actual}")]
    MismatchedType {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("{path}: invalid date {value:?}")]
    InvalidDate { path: String, value: String },

    #[error("{path}: must be zero or larger, got {value}")]
    NegativeNumber { path: String, value: f64 },

    #[error("{path}: must be one or larger, got {value}")]
    SmallerThanOne { path: String, value: i64 },

    #[error("{path}: unsupported value {value}")]
    UnsupportedValue { path: String, value: String },

    #[error("farm {farm:?} is not included in any zone")]
    FarmNotZoned { farm: String },

    #[error("zones include unknown farm {farm:?}")]
    UnknownFarmInZones { farm: String },

    #[error("{path}: {address:?} does not belong to any declared farm")]
    UnknownFarmForPartition { path: String, address: String },

    #[error("{path}: {address:?} has no database name")]
    MissingDatabaseName { path: String, address: String },

    #[error("{path}: total weight must be larger than zero")]
    ZeroTotalWeight { path: String },
}

impl ValidationError {
    /// Dotted path of the field the error refers to.
    pub fn path(&self) -> &str {
        match self {
            ValidationError::MissingRequiredParameter { path }
            | ValidationError::MismatchedType { path, .. }
            | ValidationError::InvalidDate { path, .. }
            | ValidationError::NegativeNumber { path, .. }
            | ValidationError::SmallerThanOne { path, .. }
            | ValidationError::UnsupportedValue { path, .. }
            | ValidationError::UnknownFarmForPartition { path, .. }
            | ValidationError::MissingDatabaseName { path, .. }
            | ValidationError::ZeroTotalWeight { path } => path,
            ValidationError::FarmNotZoned { .. } | ValidationError::UnknownFarmInZones { .. } => {
                "zones"
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid catalog ({} problems):\n{}", .errors.len(), render(.errors))]
    Validation { errors: Vec<ValidationError> },

    #[error("failed to access catalog {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("unsupported catalog operation: {0}")]
    Unsupported(String),
}

impl CatalogError {
    /// Validation problems carried by this error, empty for other kinds.
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            CatalogError::Validation { errors } => errors,
            _ => &[],
        }
    }
}

fn render(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|error| format!("  - {}", error))
        .collect::<Vec<_>>()
        .join("\n")
}
