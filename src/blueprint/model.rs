//! The shared data model: `Reference`, `Repository`, `Source`,
//! `TerraformComponent`, `Kustomization`, `Feature`, and `Blueprint`. These
//! are the vocabulary every other module in this crate imports, the same
//! role `io_models` plays for the teacher's `cloud_provider`/`environment`
//! modules.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const KUSTOMIZE_PREFIX: &str = "kustomize/";

/// A git-style pin: at most one of `branch`, `tag`, `commit`, `semver` is
/// expected to be set: callers that build one by hand should prefer the
/// constructor helpers below over populating the struct directly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semver: Option<String>,
}

impl Reference {
    pub fn branch(name: impl Into<String>) -> Self {
        Reference {
            branch: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Reference {
            tag: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn commit(sha: impl Into<String>) -> Self {
        Reference {
            commit: Some(sha.into()),
            ..Default::default()
        }
    }

    /// The single pinned value, preferring the most specific pin first
    /// (commit > tag > branch > semver) in case more than one happens to be
    /// set on a hand-constructed value.
    pub fn pinned_value(&self) -> Option<&str> {
        self.commit
            .as_deref()
            .or(self.tag.as_deref())
            .or(self.branch.as_deref())
            .or(self.semver.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.pinned_value().is_none()
    }
}

/// A git-style pin on the blueprint's own source repository.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "ref", skip_serializing_if = "Reference::is_empty")]
    pub reference: Reference,
    #[serde(default, rename = "secretName", skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

impl Repository {
    /// Invariant: a non-empty `url` with no `ref` defaults to `branch=main`.
    pub fn effective_reference(&self) -> Reference {
        if self.reference.is_empty() {
            Reference::branch("main")
        } else {
            self.reference.clone()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "ref", skip_serializing_if = "Reference::is_empty")]
    pub reference: Reference,
    #[serde(default, rename = "pathPrefix", skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(default, rename = "secretName", skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TerraformComponent {
    /// Before `Generate`, the name of a `Source` (or empty, meaning "the
    /// blueprint's own repository"). After `Generate`, the fully qualified
    /// `git-url//path_prefix/path?ref=X` or `oci://reg/repo:tag//path_prefix/path`.
    pub source: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "serde_yaml::Mapping::is_empty")]
    pub inputs: serde_yaml::Mapping,
    /// `<project>/.windsor/.tf_modules/<path>`, derived by the module
    /// resolver. Never serialized: it is process-local state, not part of
    /// the persisted blueprint document.
    #[serde(skip)]
    pub full_path: Option<PathBuf>,
}

impl TerraformComponent {
    pub fn full_path_under(project_root: &std::path::Path, component_path: &str) -> PathBuf {
        project_root.join(".windsor").join(".tf_modules").join(component_path)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Kustomization {
    pub name: String,
    pub path: String,
    #[serde(default, rename = "sourceRef", skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
    #[serde(default, rename = "dependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub substitutions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, rename = "retryInterval", skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroy: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup: Vec<String>,
}

impl Kustomization {
    /// Replaces backslashes with forward slashes and prefixes with
    /// `kustomize/` unless the path is already under it.
    pub fn normalize_path(path: &str) -> String {
        let forward = path.replace('\\', "/");
        let trimmed = forward.trim_start_matches('/');
        if trimmed == "kustomize" || trimmed.starts_with(KUSTOMIZE_PREFIX) {
            trimmed.to_string()
        } else {
            format!("{KUSTOMIZE_PREFIX}{trimmed}")
        }
    }

    pub fn normalize_path_in_place(&mut self) {
        self.path = Self::normalize_path(&self.path);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_api_version", rename = "apiVersion")]
    pub api_version: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub repository: Repository,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default, rename = "terraformComponents")]
    pub terraform_components: Vec<TerraformComponent>,
    #[serde(default)]
    pub kustomizations: Vec<Kustomization>,
}

fn default_kind() -> String {
    "Blueprint".to_string()
}

fn default_api_version() -> String {
    "blueprints.windsor.dev/v1alpha1".to_string()
}

impl Default for Blueprint {
    fn default() -> Self {
        Blueprint {
            kind: default_kind(),
            api_version: default_api_version(),
            metadata: Metadata::default(),
            repository: Repository::default(),
            sources: Vec::new(),
            terraform_components: Vec::new(),
            kustomizations: Vec::new(),
        }
    }
}

impl Blueprint {
    pub fn is_empty(&self) -> bool {
        self.terraform_components.is_empty() && self.kustomizations.is_empty()
    }
}

/// A feature's own component declaration, carrying the raw (un-evaluated)
/// `inputs` map alongside the structural component fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTerraformComponent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    pub component: TerraformComponent,
    #[serde(default, skip_serializing_if = "serde_yaml::Mapping::is_empty")]
    pub inputs: serde_yaml::Mapping,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureKustomization {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    pub kustomization: Kustomization,
    #[serde(default, skip_serializing_if = "serde_yaml::Mapping::is_empty")]
    pub substitutions: serde_yaml::Mapping,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub metadata: serde_yaml::Mapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// The file this feature was loaded from, relative to
    /// `contexts/_template/features/`. Not part of the serialized document:
    /// it is set by the `TemplateCollector` after parsing.
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(default, rename = "terraformComponents")]
    pub terraform_components: Vec<FeatureTerraformComponent>,
    #[serde(default)]
    pub kustomizations: Vec<FeatureKustomization>,
}

/// `registry/repository:tag`, parsed from an `oci://` reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
#[display("{registry}/{repository}:{tag}")]
pub struct OciArtifactInfo {
    pub name: String,
    pub url: String,
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl OciArtifactInfo {
    /// `<registry>-<repository>-<tag>`, the extraction cache directory name
    /// under `.windsor/.oci_extracted/`.
    pub fn cache_key(&self) -> String {
        format!("{}-{}-{}", self.registry, sanitize(&self.repository), self.tag)
    }
}

fn sanitize(repository: &str) -> String {
    repository.replace('/', "-")
}
