//! Volume binding normalization.
//!
//! Volume maps arrive from configuration files in several shapes. They are
//! converted here into one canonical form, `host_ref -> {bind, mode}`, before
//! they reach the runtime:
//!
//! | input                           | result                       |
//! |---------------------------------|------------------------------|
//! | `"/data"`                       | `{bind: "/data", mode: rw}`  |
//! | `["/data", "ro"]`               | `{bind: "/data", mode: ro}`  |
//! | `{bind: "/data", mode: "ro"}`   | unchanged                    |
//! | `null`, `""`, `[]`, `{}`        | dropped                      |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{OrchestratorError, Result};

/// Raw, not yet normalized volume map.
pub type RawVolumes = BTreeMap<String, Value>;

/// Canonical volume map keyed by host path or volume name.
pub type VolumeMap = BTreeMap<String, VolumeBinding>;

/// Access mode of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    /// Read-write.
    #[default]
    Rw,
    /// Read-only.
    Ro,
}

impl VolumeMode {
    /// Returns the mode string used in bind specifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rw => "rw",
            Self::Ro => "ro",
        }
    }

    fn parse(key: &str, mode: &str) -> Result<Self> {
        match mode.trim() {
            "rw" => Ok(Self::Rw),
            "ro" => Ok(Self::Ro),
            other => Err(OrchestratorError::volume_spec(
                key,
                format!("unknown mode '{other}', expected 'rw' or 'ro'"),
            )),
        }
    }
}

impl fmt::Display for VolumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical volume binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    /// Path inside the container.
    pub bind: String,
    /// Access mode.
    pub mode: VolumeMode,
}

impl VolumeBinding {
    /// Creates a read-write binding.
    pub fn rw(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            mode: VolumeMode::Rw,
        }
    }

    /// Creates a read-only binding.
    pub fn ro(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            mode: VolumeMode::Ro,
        }
    }

    /// Formats the Docker bind string `host_ref:bind:mode`.
    pub fn to_bind_string(&self, host_ref: &str) -> String {
        format!("{}:{}:{}", host_ref, self.bind, self.mode)
    }
}

/// Returns true if a volume key names a runtime-managed volume rather than a
/// host path.
pub fn is_managed_volume(host_ref: &str) -> bool {
    !host_ref.is_empty() && !host_ref.contains('/') && !host_ref.contains(':')
}

/// Normalizes a raw volume map into canonical bindings.
///
/// # Errors
///
/// Returns [`OrchestratorError::VolumeSpec`] naming the key of the first entry
/// that is not a string, a two-element sequence, or a map containing `bind`.
pub fn normalize(volumes: &RawVolumes) -> Result<VolumeMap> {
    let mut normalized = VolumeMap::new();
    for (key, value) in volumes {
        if let Some(binding) = normalize_entry(key, value)? {
            normalized.insert(key.clone(), binding);
        }
    }
    Ok(normalized)
}

/// Converts a canonical map back into its raw representation.
pub fn to_raw(volumes: &VolumeMap) -> RawVolumes {
    volumes
        .iter()
        .map(|(key, binding)| {
            let value = serde_json::json!({
                "bind": binding.bind,
                "mode": binding.mode.as_str(),
            });
            (key.clone(), value)
        })
        .collect()
}

fn normalize_entry(key: &str, value: &Value) -> Result<Option<VolumeBinding>> {
    match value {
        Value::Null => Ok(None),
        Value::String(path) if path.trim().is_empty() => Ok(None),
        Value::String(path) => Ok(Some(VolumeBinding::rw(path.trim()))),
        Value::Array(items) if items.is_empty() => Ok(None),
        Value::Array(items) => match items.as_slice() {
            [Value::String(bind), Value::String(mode)] => Ok(Some(VolumeBinding {
                bind: non_empty_bind(key, bind)?,
                mode: VolumeMode::parse(key, mode)?,
            })),
            _ => Err(OrchestratorError::volume_spec(
                key,
                format!(
                    "expected a [bind, mode] pair of strings, got {} element(s)",
                    items.len()
                ),
            )),
        },
        Value::Object(map) if map.is_empty() => Ok(None),
        Value::Object(map) => {
            let bind = match map.get("bind") {
                Some(Value::String(bind)) => non_empty_bind(key, bind)?,
                Some(_) => {
                    return Err(OrchestratorError::volume_spec(key, "'bind' must be a string"))
                }
                None => {
                    return Err(OrchestratorError::volume_spec(
                        key,
                        "mapping has no 'bind' entry",
                    ))
                }
            };
            let mode = match map.get("mode") {
                None | Some(Value::Null) => VolumeMode::Rw,
                Some(Value::String(mode)) => VolumeMode::parse(key, mode)?,
                Some(_) => {
                    return Err(OrchestratorError::volume_spec(key, "'mode' must be a string"))
                }
            };
            Ok(Some(VolumeBinding { bind, mode }))
        }
        Value::Bool(_) | Value::Number(_) => Err(OrchestratorError::volume_spec(
            key,
            format!("unsupported value {value}, expected a path, a [bind, mode] pair or a mapping"),
        )),
    }
}

fn non_empty_bind(key: &str, bind: &str) -> Result<String> {
    let bind = bind.trim();
    if bind.is_empty() {
        Err(OrchestratorError::volume_spec(key, "bind path is empty"))
    } else {
        Ok(bind.to_string())
    }
}
