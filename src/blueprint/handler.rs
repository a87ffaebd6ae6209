//! `BlueprintHandler`: owns the blueprint, loads/saves it, produces its
//! on-disk form, and drives install/teardown. Generalizes the teacher's
//! `engine.rs`/`transaction.rs` pattern of owning a document through a
//! single-threaded operation and persisting it via an atomically-written
//! temp-then-rename path, the same safe-write idiom `fs.rs` applies when
//! writing kubeconfig and workspace files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::blueprint::model::{Blueprint, Kustomization, OciArtifactInfo, Reference, TerraformComponent};
use crate::config_store::ConfigStore;
use crate::errors::{ConfigResolutionError, ReconciliationError, TimeoutError, WindsorError};
use crate::reconcile::ReconciliationDriver;

const BLUEPRINT_FILE_NAME: &str = "blueprint.yaml";
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// A single polling signal, injected so `wait_for_kustomizations` can be
/// driven deterministically in tests instead of depending on wall-clock
/// time, the same role the teacher's `CommandKiller::from(timeout,
/// is_canceled)` closure plays for `cmd::command`'s cancellation polling.
#[async_trait]
pub trait Ticker: Send + Sync {
    async fn tick(&mut self);
}

pub struct IntervalTicker(tokio::time::Interval);

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        IntervalTicker(interval)
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.0.tick().await;
    }
}

pub struct BlueprintHandler {
    project_root: PathBuf,
    config: ConfigStore,
    driver: Option<Arc<dyn ReconciliationDriver>>,
    loaded: bool,
    blueprint: Blueprint,
    oci_info: Option<OciArtifactInfo>,
}

impl BlueprintHandler {
    pub fn new(project_root: impl Into<PathBuf>, config: ConfigStore) -> Self {
        BlueprintHandler {
            project_root: project_root.into(),
            config,
            driver: None,
            loaded: false,
            blueprint: Blueprint::default(),
            oci_info: None,
        }
    }

    pub fn with_driver(mut self, driver: Arc<dyn ReconciliationDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    fn blueprint_path(&self) -> PathBuf {
        self.config.config_root().join(BLUEPRINT_FILE_NAME)
    }

    /// Load precedence: `<config-root>/blueprint.yaml` if present, adopted
    /// as the handler's blueprint (first-loader-wins from here on). A
    /// missing file is reported as an error but does not itself count as a
    /// load — callers that want template-driven composition use
    /// `load_blueprint` instead, and may still do so afterward.
    pub fn load_config(&mut self) -> Result<(), WindsorError> {
        let path = self.blueprint_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                if !self.loaded {
                    let parsed: Blueprint = serde_yaml::from_str(&contents).map_err(|err| {
                        ConfigResolutionError::ProjectRootNotFound {
                            reason: format!("parsing {}: {err}", path.display()),
                        }
                    })?;
                    self.blueprint = parsed;
                    self.loaded = true;
                }
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(WindsorError::Config(
                ConfigResolutionError::MissingKey {
                    key: format!("local blueprint file absent at {}", path.display()),
                },
            )),
            Err(err) => Err(WindsorError::from(err)),
        }
    }

    /// Adopts an already-composed blueprint (collected and composed by the
    /// caller via `TemplateCollector`/`FeatureComposer`): a no-op if a
    /// blueprint has already been loaded (first-loader-wins).
    pub fn load_blueprint(&mut self, composed: Blueprint) {
        if self.loaded {
            return;
        }
        self.blueprint = composed;
        self.loaded = true;
    }

    /// Unmarshals `map` into the blueprint; a no-op if a blueprint has
    /// already been loaded.
    pub fn load_data(&mut self, map: serde_yaml::Value, oci_info: Option<OciArtifactInfo>) -> Result<(), WindsorError> {
        if self.loaded {
            return Ok(());
        }

        let parsed: Blueprint = serde_yaml::from_value(map).map_err(|err| {
            ConfigResolutionError::ProjectRootNotFound {
                reason: format!("decoding blueprint data: {err}"),
            }
        })?;
        self.blueprint = parsed;
        self.oci_info = oci_info;
        self.loaded = true;
        Ok(())
    }

    /// Returns a deep copy of the blueprint with defaults materialized:
    /// kustomization paths normalized and filled in, terraform sources
    /// expanded to their fully qualified form.
    pub fn generate(&self) -> Blueprint {
        let mut generated = self.blueprint.clone();

        for kustomization in &mut generated.kustomizations {
            self.apply_kustomization_defaults(kustomization);
        }

        for component in &mut generated.terraform_components {
            self.qualify_terraform_component(component);
        }

        generated
    }

    fn apply_kustomization_defaults(&self, kustomization: &mut Kustomization) {
        if kustomization.source_ref.is_none() {
            kustomization.source_ref = Some(self.blueprint.metadata.name.clone());
        }
        kustomization.normalize_path_in_place();

        if kustomization.interval.is_none() {
            kustomization.interval = Some(self.config.get_string("kustomization.interval").unwrap_or_else(|| "5m".to_string()));
        }
        if kustomization.retry_interval.is_none() {
            kustomization.retry_interval = Some(
                self.config
                    .get_string("kustomization.retryInterval")
                    .unwrap_or_else(|| "2m".to_string()),
            );
        }
        if kustomization.timeout.is_none() {
            kustomization.timeout = Some(self.config.get_string("kustomization.timeout").unwrap_or_else(|| "3m".to_string()));
        }
        if kustomization.wait.is_none() {
            kustomization.wait = Some(self.config.get_bool("kustomization.wait").unwrap_or(true));
        }
        if kustomization.force.is_none() {
            kustomization.force = Some(self.config.get_bool("kustomization.force").unwrap_or(false));
        }
        if kustomization.destroy.is_none() {
            kustomization.destroy = Some(self.config.get_bool("kustomization.destroy").unwrap_or(true));
        }
    }

    fn qualify_terraform_component(&self, component: &mut TerraformComponent) {
        let (url, path_prefix, reference) = if component.source.is_empty() {
            (self.blueprint.repository.url.clone(), None, self.blueprint.repository.effective_reference())
        } else if let Some(source) = self.blueprint.sources.iter().find(|s| s.name == component.source) {
            (source.url.clone(), source.path_prefix.clone(), source.reference.clone())
        } else {
            (component.source.clone(), None, Reference::default())
        };

        component.source = qualify_source(&url, path_prefix.as_deref(), &reference, &component.path);
        component.full_path = Some(TerraformComponent::full_path_under(&self.project_root, &component.path));
    }

    /// 1. Resolve `<config-root>/blueprint.yaml`.
    /// 2. No-op if the file exists and `overwrite` is not true.
    /// 3. Synthesize a dev-mode repository URL when one is missing.
    /// 4. Clear every terraform component's `inputs` in the serialized form.
    /// 5. Marshal and write atomically.
    pub fn write(&self, overwrite: bool) -> Result<(), WindsorError> {
        let path = self.blueprint_path();
        if path.exists() && !overwrite {
            return Ok(());
        }

        let mut to_write = self.blueprint.clone();

        if self.config.get_bool("dev").unwrap_or(false) && to_write.repository.url.is_empty() {
            let project_name = self
                .project_root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("project")
                .to_string();
            if let Some(domain) = self.config.get_string("dns.domain") {
                to_write.repository.url = format!("https://{domain}/{project_name}.git");
            }
        }

        for component in &mut to_write.terraform_components {
            component.inputs.clear();
        }

        let serialized = serde_yaml::to_string(&to_write).map_err(|err| ConfigResolutionError::ProjectRootNotFound {
            reason: format!("serializing blueprint: {err}"),
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("yaml.tmp");
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &path)?;

        info!(path = %path.display(), "wrote blueprint");
        Ok(())
    }

    fn driver(&self) -> Result<&Arc<dyn ReconciliationDriver>, WindsorError> {
        self.driver.as_ref().ok_or_else(|| {
            WindsorError::Config(ConfigResolutionError::MissingDependency {
                name: "ReconciliationDriver".to_string(),
            })
        })
    }

    fn managed_namespace(&self) -> String {
        self.config.get_string("cluster.namespace").unwrap_or_else(|| "windsor-system".to_string())
    }

    /// Namespace → main repository → sources → configmaps → kustomizations,
    /// per the ordering guarantee in §5.
    pub async fn install(&self) -> Result<(), WindsorError> {
        let driver = self.driver()?;
        let generated = self.generate();
        let namespace = self.managed_namespace();

        driver.create_namespace(&namespace).await?;

        if !generated.repository.url.is_empty() {
            driver.apply_git_repository(&generated.metadata.name, &generated.repository).await?;
        }

        for source in &generated.sources {
            driver.apply_source_git_repository(source).await?;
        }

        for kustomization in &generated.kustomizations {
            if !kustomization.substitutions.is_empty() {
                let data: BTreeMap<String, String> = kustomization.substitutions.clone().into_iter().collect();
                driver.apply_config_map(&kustomization.name, &namespace, &data).await?;
            }
        }

        for kustomization in &generated.kustomizations {
            driver.apply_kustomization(kustomization).await?;
        }

        Ok(())
    }

    fn resolve_names(&self, names: &[String]) -> Vec<String> {
        let wants_all = names.is_empty() || (names.len() == 1 && names[0].is_empty());
        if wants_all {
            self.blueprint.kustomizations.iter().map(|k| k.name.clone()).collect()
        } else {
            names.to_vec()
        }
    }

    /// Polls `GetKustomizationStatus` on `ticker`, tolerating up to
    /// `MAX_CONSECUTIVE_FAILURES` consecutive errors before giving up, bounded
    /// overall by `deadline`. An empty kustomization list returns
    /// immediately with success.
    pub async fn wait_for_kustomizations(
        &self,
        names: &[String],
        mut ticker: impl Ticker,
        deadline: Duration,
    ) -> Result<(), WindsorError> {
        let names = self.resolve_names(names);
        if names.is_empty() {
            return Ok(());
        }

        let driver = self.driver()?.clone();
        driver.check_git_repository_status().await?;

        let poll = async {
            let mut consecutive_failures = 0u32;
            loop {
                ticker.tick().await;
                match driver.get_kustomization_status(&names).await {
                    Ok(statuses) => {
                        consecutive_failures = 0;
                        if names.iter().all(|n| statuses.get(n).copied().unwrap_or(false)) {
                            return Ok(());
                        }
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            return Err(ReconciliationError::ConsecutiveFailures {
                                attempts: consecutive_failures,
                                last_error: err.to_string(),
                            });
                        }
                    }
                }
            }
        };

        match tokio::time::timeout(deadline, poll).await {
            Ok(result) => result.map_err(WindsorError::from),
            Err(_) => Err(WindsorError::from(TimeoutError { elapsed: deadline, names })),
        }
    }

    /// Cleanup-apply → original-delete → cleanup-delete, per the ordering
    /// guarantee in §5.
    pub async fn down(&self) -> Result<(), WindsorError> {
        let driver = self.driver()?.clone();
        let namespace = self.managed_namespace();
        let generated = self.generate();

        let mut cleanup_kustomizations = Vec::new();
        for kustomization in &generated.kustomizations {
            for (index, cleanup_path) in kustomization.cleanup.iter().enumerate() {
                let cleanup = synthesize_cleanup_kustomization(kustomization, cleanup_path, index);
                driver.apply_kustomization(&cleanup).await?;
                self.wait_for_kustomizations(
                    &[cleanup.name.clone()],
                    IntervalTicker::new(Duration::from_millis(500)),
                    Duration::from_secs(60),
                )
                .await?;
                cleanup_kustomizations.push(cleanup);
            }
        }

        for kustomization in &generated.kustomizations {
            driver.delete_kustomization(&kustomization.name, &namespace).await?;
        }

        for cleanup in &cleanup_kustomizations {
            driver
                .delete_kustomization(&cleanup.name, &namespace)
                .await
                .map_err(|err| ReconciliationError::CleanupDeletionFailed {
                    name: cleanup.name.clone(),
                    source: err.to_string(),
                })?;
        }

        Ok(())
    }
}

fn qualify_source(url: &str, path_prefix: Option<&str>, reference: &Reference, component_path: &str) -> String {
    let joined = join_prefixed(path_prefix, component_path);
    if url.starts_with("oci://") {
        format!("{url}//{joined}")
    } else {
        let pinned = reference.pinned_value().unwrap_or("main");
        format!("{url}//{joined}?ref={pinned}")
    }
}

fn join_prefixed(prefix: Option<&str>, path: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}/{}", p.trim_matches('/'), path.trim_start_matches('/')),
        _ => path.to_string(),
    }
}

fn synthesize_cleanup_kustomization(original: &Kustomization, cleanup_path: &str, index: usize) -> Kustomization {
    Kustomization {
        name: format!("{}-cleanup-{}", original.name, index),
        path: Kustomization::normalize_path(&format!("{}/{}", original.path, cleanup_path)),
        source_ref: original.source_ref.clone(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::model::{Metadata, Repository, Source};
    use crate::config_store::{ConfigStore, ContextValues};
    use std::collections::BTreeMap as Map;

    fn handler(project_root: &Path) -> BlueprintHandler {
        let config = ConfigStore::new(project_root.to_path_buf(), "local".to_string(), ContextValues::empty());
        BlueprintHandler::new(project_root, config)
    }

    struct FakeDriver {
        statuses: std::sync::Mutex<Vec<Result<Map<String, bool>, String>>>,
    }

    #[async_trait]
    impl ReconciliationDriver for FakeDriver {
        async fn create_namespace(&self, _name: &str) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn apply_git_repository(&self, _name: &str, _repository: &Repository) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn apply_source_git_repository(&self, _source: &Source) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn apply_config_map(&self, _name: &str, _namespace: &str, _data: &Map<String, String>) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn apply_kustomization(&self, _kustomization: &Kustomization) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn delete_kustomization(&self, _name: &str, _namespace: &str) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn check_git_repository_status(&self) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn get_kustomization_status(&self, names: &[String]) -> Result<Map<String, bool>, ReconciliationError> {
            let mut guard = self.statuses.lock().unwrap();
            match guard.remove(0) {
                Ok(map) => Ok(names.iter().map(|n| (n.clone(), map.get(n).copied().unwrap_or(false))).collect()),
                Err(message) => Err(ReconciliationError::ClusterClient {
                    operation: "get_kustomization_status".to_string(),
                    message,
                }),
            }
        }
    }

    struct InstantTicker;

    #[async_trait]
    impl Ticker for InstantTicker {
        async fn tick(&mut self) {}
    }

    #[test]
    fn first_loader_wins_blocks_subsequent_load_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());
        handler.blueprint.metadata.name = "A".into();
        handler.loaded = true;

        let map = serde_yaml::to_value(&Blueprint {
            metadata: Metadata {
                name: "B".into(),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();

        handler.load_data(map, None).unwrap();
        assert_eq!(handler.blueprint().metadata.name, "A");
    }

    #[test]
    fn terraform_source_resolves_to_expected_git_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());
        handler.blueprint.sources.push(Source {
            name: "s1".into(),
            url: "https://example.com/mod.git".into(),
            reference: Reference::branch("main"),
            path_prefix: Some("terraform".into()),
            secret_name: None,
        });
        handler.blueprint.terraform_components.push(TerraformComponent {
            source: "s1".into(),
            path: "cluster/talos".into(),
            ..Default::default()
        });

        let generated = handler.generate();
        assert_eq!(
            generated.terraform_components[0].source,
            "https://example.com/mod.git//terraform/cluster/talos?ref=main"
        );
        assert!(generated.terraform_components[0]
            .full_path
            .as_ref()
            .unwrap()
            .ends_with(".windsor/.tf_modules/cluster/talos"));
    }

    #[test]
    fn kustomization_path_normalization_and_cleanup_naming() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());
        handler.blueprint.kustomizations.push(Kustomization {
            name: "k1".into(),
            path: "ingress\\base".into(),
            cleanup: vec!["cleanup".into()],
            ..Default::default()
        });

        let generated = handler.generate();
        assert_eq!(generated.kustomizations[0].path, "kustomize/ingress/base");

        let cleanup = synthesize_cleanup_kustomization(&generated.kustomizations[0], "cleanup", 0);
        assert_eq!(cleanup.name, "k1-cleanup-0");
        assert_eq!(cleanup.path, "kustomize/ingress/base/cleanup");
    }

    #[tokio::test]
    async fn wait_for_kustomizations_with_no_kustomizations_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path()).with_driver(Arc::new(FakeDriver {
            statuses: std::sync::Mutex::new(vec![]),
        }));

        handler
            .wait_for_kustomizations(&[], InstantTicker, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_kustomizations_fails_after_five_consecutive_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());
        handler.blueprint.kustomizations.push(Kustomization {
            name: "k1".into(),
            path: "kustomize/ingress".into(),
            ..Default::default()
        });
        let handler = handler.with_driver(Arc::new(FakeDriver {
            statuses: std::sync::Mutex::new(vec![
                Err("boom".into()),
                Err("boom".into()),
                Err("boom".into()),
                Err("boom".into()),
                Err("boom".into()),
            ]),
        }));

        let err = handler
            .wait_for_kustomizations(&["k1".to_string()], InstantTicker, Duration::from_secs(5))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("consecutive failures"), "unexpected message: {message}");
    }

    struct CleanupFailingDriver;

    #[async_trait]
    impl ReconciliationDriver for CleanupFailingDriver {
        async fn create_namespace(&self, _name: &str) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn apply_git_repository(&self, _name: &str, _repository: &Repository) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn apply_source_git_repository(&self, _source: &Source) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn apply_config_map(&self, _name: &str, _namespace: &str, _data: &Map<String, String>) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn apply_kustomization(&self, _kustomization: &Kustomization) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn delete_kustomization(&self, name: &str, _namespace: &str) -> Result<(), ReconciliationError> {
            if name.contains("-cleanup-") {
                Err(ReconciliationError::ClusterClient {
                    operation: "delete_kustomization".to_string(),
                    message: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
        async fn check_git_repository_status(&self) -> Result<(), ReconciliationError> {
            Ok(())
        }
        async fn get_kustomization_status(&self, names: &[String]) -> Result<Map<String, bool>, ReconciliationError> {
            Ok(names.iter().map(|n| (n.clone(), true)).collect())
        }
    }

    #[tokio::test]
    async fn down_surfaces_cleanup_deletion_failures_distinctly() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());
        handler.blueprint.kustomizations.push(Kustomization {
            name: "k1".into(),
            path: "kustomize/ingress".into(),
            cleanup: vec!["cleanup".into()],
            ..Default::default()
        });
        let handler = handler.with_driver(Arc::new(CleanupFailingDriver));

        let err = handler.down().await.unwrap_err();
        let message = err.to_string();
        assert!(
            message.contains("failed to remove cleanup kustomization"),
            "unexpected message: {message}"
        );
        assert!(message.contains("k1-cleanup-0"), "unexpected message: {message}");
    }
}
