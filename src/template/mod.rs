//! Walks `<project>/contexts/_template/` and produces a name→bytes map of
//! everything the composition pipeline needs: the base blueprint, every
//! feature file, every Jsonnet template, and the current context's
//! substitutions subtree. Grounded on the teacher's `fs::copy_files`, which
//! walks a source tree with `walkdir::WalkDir` and keys its output off paths
//! relative to the root it started from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config_store::ContextValues;
use crate::errors::IOError;

const TEMPLATE_DIR: &str = "contexts/_template";
const FEATURES_DIR: &str = "features";
const BLUEPRINT_FILE: &str = "blueprint.yaml";

pub struct TemplateCollector {
    project_root: PathBuf,
}

impl TemplateCollector {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        TemplateCollector {
            project_root: project_root.into(),
        }
    }

    fn template_root(&self) -> PathBuf {
        self.project_root.join(TEMPLATE_DIR)
    }

    /// Collects the template tree into the name→bytes map described in the
    /// module doc comment. `substitutions` supplies the current context's
    /// merged values, from which the `substitutions` subtree (if any) is
    /// marshaled back to YAML bytes.
    pub fn collect(&self, substitutions: &ContextValues) -> Result<BTreeMap<String, Vec<u8>>, IOError> {
        let root = self.template_root();
        let mut out = BTreeMap::new();

        if !root.exists() {
            return Ok(out);
        }

        let blueprint_path = root.join(BLUEPRINT_FILE);
        if blueprint_path.is_file() {
            out.insert("blueprint".to_string(), read(&blueprint_path)?);
        }

        let features_root = root.join(FEATURES_DIR);
        if features_root.is_dir() {
            for entry in WalkDir::new(&features_root).follow_links(true) {
                let entry = entry.map_err(|err| IOError::Fs {
                    path: features_root.clone(),
                    source: std::io::Error::other(err),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.path().extension().and_then(|e| e.to_str()) != Some("yaml") {
                    continue;
                }
                let relative = relative_to(entry.path(), &features_root);
                out.insert(format!("features/{relative}.yaml", relative = strip_yaml_suffix(&relative)), read(entry.path())?);
            }
        }

        for entry in WalkDir::new(&root).follow_links(true) {
            let entry = entry.map_err(|err| IOError::Fs {
                path: root.clone(),
                source: std::io::Error::other(err),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("jsonnet") {
                continue;
            }
            let relative = relative_to(entry.path(), &root);
            out.insert(format!("{}.jsonnet", strip_jsonnet_suffix(&relative)), read(entry.path())?);
        }

        if let Some(subtree) = substitutions.get("substitutions") {
            let marshaled = serde_yaml::to_string(subtree).map_err(|err| IOError::Fs {
                path: root.join("substitutions"),
                source: std::io::Error::other(err),
            })?;
            out.insert("substitutions".to_string(), marshaled.into_bytes());
        }

        Ok(out)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, IOError> {
    std::fs::read(path).map_err(|source| IOError::Fs {
        path: path.to_path_buf(),
        source,
    })
}

fn relative_to(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn strip_yaml_suffix(relative: &str) -> &str {
    relative.strip_suffix(".yaml").unwrap_or(relative)
}

fn strip_jsonnet_suffix(relative: &str) -> &str {
    relative.strip_suffix(".jsonnet").unwrap_or(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn collects_blueprint_features_and_jsonnet() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(TEMPLATE_DIR);
        write(&root.join(BLUEPRINT_FILE), "kind: Blueprint\n");
        write(&root.join("features/aws.yaml"), "metadata: {}\n");
        write(&root.join("helpers/merge.jsonnet"), "{}\n");

        let collector = TemplateCollector::new(dir.path());
        let collected = collector.collect(&ContextValues::empty()).unwrap();

        assert!(collected.contains_key("blueprint"));
        assert!(collected.contains_key("features/aws.yaml"));
        assert!(collected.contains_key("helpers/merge.jsonnet"));
    }

    #[test]
    fn missing_template_root_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let collector = TemplateCollector::new(dir.path());
        let collected = collector.collect(&ContextValues::empty()).unwrap();
        assert!(collected.is_empty());
    }

    #[test]
    fn includes_substitutions_subtree_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join(TEMPLATE_DIR);
        write(&root.join(BLUEPRINT_FILE), "kind: Blueprint\n");

        let values = ContextValues::from_value(serde_yaml::from_str("substitutions:\n  domain: example.com\n").unwrap());
        let collector = TemplateCollector::new(dir.path());
        let collected = collector.collect(&values).unwrap();

        assert!(collected.contains_key("substitutions"));
    }
}
