//! Version-detecting catalog loader.

use super::error::{CatalogError, ValidationError};
use super::types::{CatalogModel, CatalogVersion};
use super::{version1, version2};

use serde_json::Value;
use std::path::{Path, PathBuf};

/// Validates `raw` and builds a model from it.
///
/// On failure the error lists every problem found, not just the first one.
pub fn load(raw: &Value) -> Result<CatalogModel, CatalogError> {
    load_with_base(raw, None)
}

/// Like [`load`], resolving relative database paths against `base_path`.
pub fn load_with_base(raw: &Value, base_path: Option<PathBuf>) -> Result<CatalogModel, CatalogError> {
    let model = match detect_version(raw)? {
        CatalogVersion::V1 => version1::load(raw, base_path)?,
        CatalogVersion::V2 => version2::load(raw, base_path)?,
    };
    tracing::info!(
        "Loaded {:?} catalog with {} datasets (effective {})",
        model.version(),
        model.datasets().len(),
        model.effective_date()
    );
    Ok(model)
}

/// Reads and loads a JSON catalog file.
pub fn load_file(path: &Path) -> Result<CatalogModel, CatalogError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: Value = serde_json::from_str(&contents)?;
    let base_path = path.parent().map(Path::to_path_buf);
    load_with_base(&raw, base_path)
}

pub fn detect_version(raw: &Value) -> Result<CatalogVersion, CatalogError> {
    let unsupported = |value: &Value| CatalogError::Validation {
        errors: vec![ValidationError::UnsupportedValue {
            path: "version".to_string(),
            value: value.to_string(),
        }],
    };

    if !raw.is_object() {
        return Err(CatalogError::Validation {
            errors: vec![ValidationError::MismatchedType {
                path: "$".to_string(),
                expected: "object".to_string(),
                actual: super::validator::type_name(raw).to_string(),
            }],
        });
    }

    match raw.get("version") {
        None | Some(Value::Null) => Ok(CatalogVersion::V1),
        Some(value) => match value.as_u64() {
            Some(1) => Ok(CatalogVersion::V1),
            Some(2) => Ok(CatalogVersion::V2),
            _ => Err(unsupported(value)),
        },
    }
}
