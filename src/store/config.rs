use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};

use crate::error::{BundleError, Result};
use crate::store::layout::CONFIG_FILE;

/// Explicit schema-version field, present from version 2 onwards.
pub const VERSION_FIELD: &str = "project_file_version";
/// Free-form application version string carried by version 1 bundles.
pub const LEGACY_VERSION_FIELD: &str = "version";

const ID_FIELD: &str = "id";
const UNKNOWN_PROJECT_ID: &str = "unknown";

/// The version-tagged `project.json` document of a bundle.
///
/// Held as an ordered JSON object so unknown fields survive a load/save
/// round trip untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    path: PathBuf,
    fields: Map<String, Value>,
}

impl ConfigDocument {
    /// Read `project.json` from a bundle directory.
    pub fn load(bundle: &Path) -> Result<Self> {
        let path = bundle.join(CONFIG_FILE);
        if !path.is_file() {
            return Err(BundleError::NotFound(path));
        }

        let data = fs::read_to_string(&path)?;
        let value: Value = serde_json::from_str(&data)?;
        let Value::Object(fields) = value else {
            return Err(BundleError::invalid_config(path, "not a JSON object"));
        };

        Ok(Self { path, fields })
    }

    /// Write the document to `project.json` inside `bundle`.
    pub fn save(&self, bundle: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.fields)?;
        fs::write(bundle.join(CONFIG_FILE), json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) -> Option<Value> {
        self.fields.insert(key.to_string(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Project id used to label errors; `"unknown"` when the field is absent.
    pub fn project_id(&self) -> &str {
        self.fields
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_PROJECT_ID)
    }

    /// Schema version of the bundle: the explicit `project_file_version` when
    /// present, otherwise the leading integer of the legacy `version` string.
    pub fn detect_version(&self) -> Result<u32> {
        if let Some(explicit) = self.fields.get(VERSION_FIELD) {
            return explicit
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    BundleError::invalid_config(
                        &self.path,
                        format!("{VERSION_FIELD} must be a non-negative integer, got {explicit}"),
                    )
                });
        }

        let Some(legacy) = self.fields.get(LEGACY_VERSION_FIELD).and_then(Value::as_str) else {
            return Err(BundleError::invalid_config(
                &self.path,
                format!("neither {VERSION_FIELD} nor a {LEGACY_VERSION_FIELD} string is present"),
            ));
        };

        leading_integer(legacy).ok_or_else(|| {
            BundleError::invalid_config(
                &self.path,
                format!("cannot derive a schema version from app version '{legacy}'"),
            )
        })
    }

    /// Stamp the explicit schema version.
    pub fn set_version(&mut self, version: u32) {
        self.fields.insert(VERSION_FIELD.to_string(), json!(version));
    }
}

fn leading_integer(raw: &str) -> Option<u32> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
