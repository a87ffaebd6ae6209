//! Read-only projection of merged user configuration.
//!
//! Generalizes the teacher's `io_models::context::Context`: a cheaply
//! cloneable handle carrying everything downstream components need to look
//! up typed values without reaching back into the filesystem themselves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_yaml::Value as YamlValue;

use crate::errors::ConfigResolutionError;

/// A snapshot of the merged configuration tree, handed to the expression
/// engine as the `env` argument of `EvaluateBool`/`EvaluateValue`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextValues {
    root: YamlValue,
}

impl ContextValues {
    pub fn empty() -> Self {
        ContextValues {
            root: YamlValue::Mapping(Default::default()),
        }
    }

    pub fn from_value(root: YamlValue) -> Self {
        ContextValues { root }
    }

    pub fn as_value(&self) -> &YamlValue {
        &self.root
    }

    pub fn get(&self, dotted_key: &str) -> Option<&YamlValue> {
        let mut current = &self.root;
        for segment in dotted_key.split('.') {
            current = current.as_mapping()?.get(YamlValue::String(segment.to_string()))?;
        }
        Some(current)
    }
}

/// Read-only projection of `contexts/<name>/values.yaml` merged over
/// whatever layered defaults the project defines.
#[derive(Clone)]
pub struct ConfigStore {
    context_name: String,
    project_root: PathBuf,
    values: ContextValues,
}

impl ConfigStore {
    pub fn new(project_root: PathBuf, context_name: String, values: ContextValues) -> Self {
        ConfigStore {
            context_name,
            project_root,
            values,
        }
    }

    /// Loads `contexts/<context_name>/values.yaml` relative to `project_root`.
    /// A missing file yields an empty `ContextValues`, not an error: a
    /// context with no overrides is a legitimate, common configuration.
    pub fn load(project_root: &Path, context_name: &str) -> Result<Self, ConfigResolutionError> {
        let values_path = project_root.join("contexts").join(context_name).join("values.yaml");

        let values = match std::fs::read_to_string(&values_path) {
            Ok(contents) => {
                let parsed: YamlValue =
                    serde_yaml::from_str(&contents).map_err(|err| ConfigResolutionError::MissingKey {
                        key: format!("{}: {}", values_path.display(), err),
                    })?;
                ContextValues::from_value(parsed)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ContextValues::empty(),
            Err(err) => {
                return Err(ConfigResolutionError::ProjectRootNotFound {
                    reason: format!("reading {}: {}", values_path.display(), err),
                });
            }
        };

        Ok(ConfigStore::new(project_root.to_path_buf(), context_name.to_string(), values))
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// `<project_root>/contexts/<context_name>/`, the root under which the
    /// persisted `blueprint.yaml` and `values.yaml` for the current context
    /// live, per §6's file layout.
    pub fn config_root(&self) -> PathBuf {
        self.project_root.join("contexts").join(&self.context_name)
    }

    pub fn values(&self) -> &ContextValues {
        &self.values
    }

    pub fn snapshot(&self) -> ContextValues {
        self.values.clone()
    }

    pub fn get_bool(&self, dotted_key: &str) -> Option<bool> {
        self.values.get(dotted_key)?.as_bool()
    }

    pub fn get_string(&self, dotted_key: &str) -> Option<String> {
        self.values.get(dotted_key)?.as_str().map(str::to_string)
    }

    pub fn get_duration(&self, dotted_key: &str) -> Option<Duration> {
        let raw = self.get_string(dotted_key)?;
        parse_duration(&raw)
    }

    pub fn require_string(&self, dotted_key: &str) -> Result<String, ConfigResolutionError> {
        self.get_string(dotted_key).ok_or_else(|| ConfigResolutionError::MissingKey {
            key: dotted_key.to_string(),
        })
    }
}

/// Minimal Go-duration-style parser (`"5s"`, `"2m30s"`, `"1h"`), matching the
/// short, suffix-based durations used throughout the blueprint's timeouts.
fn parse_duration(raw: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut digits = String::new();

    for ch in raw.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            digits.push(ch);
            continue;
        }

        let value: f64 = digits.parse().ok()?;
        digits.clear();

        let unit = match ch {
            's' => Duration::from_secs_f64(value),
            'm' => Duration::from_secs_f64(value * 60.0),
            'h' => Duration::from_secs_f64(value * 3600.0),
            _ => return None,
        };
        total += unit;
    }

    if !digits.is_empty() {
        return None;
    }

    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("garbage"), None);
    }

    #[test]
    fn context_values_get_walks_dotted_path() {
        let values = ContextValues::from_value(
            serde_yaml::from_str("observability:\n  enabled: true\n").unwrap(),
        );
        assert_eq!(values.get("observability.enabled").and_then(|v| v.as_bool()), Some(true));
        assert!(values.get("observability.missing").is_none());
    }

    #[test]
    fn load_missing_values_file_yields_empty_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path(), "local").unwrap();
        assert_eq!(store.values(), &ContextValues::empty());
    }
}
