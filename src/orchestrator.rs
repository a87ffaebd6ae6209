//! The composition root: wires `ConfigStore`, `Shell`, `ExpressionEngine`,
//! `TemplateCollector`, `FeatureComposer`, `OCIArtifactEngine`,
//! `BlueprintHandler`, and `ModuleResolver` into the three top-level
//! operations an external command dispatcher calls — `bundle`, `push`,
//! `generate` — the same role the teacher's `Engine` plays wiring
//! `InfrastructureContext`, `CloudProvider`, and the deployment actions
//! together behind a handful of top-level entry points.

use std::path::PathBuf;
use std::sync::Arc;

use itertools::Itertools;

use crate::blueprint::handler::BlueprintHandler;
use crate::blueprint::model::Feature;
use crate::config_store::ConfigStore;
use crate::errors::{TemplateCompositionError, WindsorError};
use crate::expression::ExpressionEngine;
use crate::feature::merge_features;
use crate::module_resolver::ModuleResolver;
use crate::oci::OCIArtifactEngine;
use crate::reconcile::ReconciliationDriver;
use crate::template::TemplateCollector;

/// Registry URL this engine's artifacts carry in Jsonnet context (`ociUrl`)
/// when none has been pulled yet: bundling and generating from a bare
/// template tree both need a stable placeholder so expressions referencing
/// `ociUrl` do not fail merely because no artifact has been fetched.
const DEFAULT_OCI_URL: &str = "oci://unresolved/windsor/blueprint:unresolved";

pub struct ResourceOrchestrator {
    project_root: PathBuf,
    config: ConfigStore,
    driver: Option<Arc<dyn ReconciliationDriver>>,
}

impl ResourceOrchestrator {
    pub fn new(project_root: impl Into<PathBuf>, config: ConfigStore) -> Self {
        ResourceOrchestrator {
            project_root: project_root.into(),
            config,
            driver: None,
        }
    }

    pub fn with_driver(mut self, driver: Arc<dyn ReconciliationDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    fn expression_engine(&self) -> ExpressionEngine {
        ExpressionEngine::new(self.project_root.clone(), self.config.context_name().to_string(), DEFAULT_OCI_URL.to_string())
    }

    /// Collects templates, composes features against the current context's
    /// values, and returns the merged blueprint — `None` when the template
    /// tree and every feature it names are empty, matching §8 invariant 6.
    fn compose(&self) -> Result<Option<crate::blueprint::model::Blueprint>, WindsorError> {
        let engine = self.expression_engine();
        let env = self.config.snapshot();

        let collector = TemplateCollector::new(&self.project_root);
        let collected = collector.collect(&env)?;

        let mut features = Vec::new();
        for (name, bytes) in &collected {
            let Some(relative) = name.strip_prefix("features/") else {
                continue;
            };
            let text = String::from_utf8_lossy(bytes);
            let mut feature: Feature = serde_yaml::from_str(&text).map_err(|err| TemplateCompositionError::MalformedFeature {
                path: PathBuf::from(relative),
                message: err.to_string(),
            })?;
            feature.path = PathBuf::from(relative);
            features.push(feature);
        }
        // Lexicographic order of feature file names, per §5's composition
        // ordering guarantee.
        let features = features.into_iter().sorted_by(|a, b| a.path.cmp(&b.path)).collect::<Vec<_>>();

        Ok(merge_features(&engine, &features, &env, self.config.context_name())?)
    }

    /// `generate [--overwrite]`: composes the blueprint from the template
    /// tree, adopts it into the handler, materializes terraform module
    /// shims, and writes `blueprint.yaml`.
    pub async fn generate(&self, overwrite: bool) -> Result<(), WindsorError> {
        let mut handler = BlueprintHandler::new(&self.project_root, self.config_clone());
        if let Some(composed) = self.compose()? {
            handler.load_blueprint(composed);
        }

        let mut generated = handler.generate();

        let oci_engine = OCIArtifactEngine::new(&self.project_root);
        let mut resolver = ModuleResolver::new(&self.project_root, &oci_engine);
        resolver.process_modules(&mut generated.terraform_components).await?;

        // A fresh handler, rather than re-loading into `handler`, since
        // `load_blueprint` is first-loader-wins and `handler` already
        // adopted the pre-resolution blueprint above.
        let mut final_handler = BlueprintHandler::new(&self.project_root, self.config_clone());
        final_handler.load_blueprint(generated);
        final_handler.write(overwrite)
    }

    /// `bundle <outputPath> <tag>`: packages the on-disk project tree
    /// (templates plus terraform and kustomize directories, minus
    /// process-local state) into a gzipped tar layer written to
    /// `output_path`. Bypasses composition entirely.
    pub fn bundle(&self, output_path: &std::path::Path, tag: &str) -> Result<PathBuf, WindsorError> {
        let engine = OCIArtifactEngine::new(&self.project_root);
        Ok(engine.create(output_path, tag)?)
    }

    /// `push <registryBase> <repoName> <tag>`: builds the same bundle
    /// in-memory and pushes it as a single-layer OCI image.
    pub async fn push(&self, registry_base: &str, repo_name: &str, tag: &str) -> Result<(), WindsorError> {
        let engine = OCIArtifactEngine::new(&self.project_root);
        engine.push(registry_base, repo_name, tag).await?;
        Ok(())
    }

    /// Not a `bundle`/`push`/`generate` verb itself, but the same
    /// composition root wires the persisted blueprint to the cluster via
    /// the injected `ReconciliationDriver`, so `install`/`down` are exposed
    /// here rather than forcing every caller to construct its own
    /// `BlueprintHandler`.
    pub async fn install(&self) -> Result<(), WindsorError> {
        self.loaded_handler()?.install().await
    }

    pub async fn down(&self) -> Result<(), WindsorError> {
        self.loaded_handler()?.down().await
    }

    fn loaded_handler(&self) -> Result<BlueprintHandler, WindsorError> {
        let mut handler = BlueprintHandler::new(&self.project_root, self.config_clone());
        if let Some(driver) = &self.driver {
            handler = handler.with_driver(driver.clone());
        }
        handler.load_config()?;
        Ok(handler)
    }

    fn config_clone(&self) -> ConfigStore {
        ConfigStore::new(self.config.project_root().to_path_buf(), self.config.context_name().to_string(), self.config.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::ContextValues;

    fn orchestrator_in(dir: &std::path::Path) -> ResourceOrchestrator {
        let config = ConfigStore::new(dir.to_path_buf(), "local".to_string(), ContextValues::empty());
        ResourceOrchestrator::new(dir, config)
    }

    fn blueprint_path(dir: &std::path::Path) -> PathBuf {
        dir.join("contexts").join("local").join("blueprint.yaml")
    }

    #[tokio::test]
    async fn generate_with_no_template_tree_writes_an_empty_blueprint() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator_in(dir.path());

        orchestrator.generate(false).await.unwrap();

        let written = std::fs::read_to_string(blueprint_path(dir.path())).unwrap();
        assert!(written.contains("kind"));
    }

    #[tokio::test]
    async fn generate_does_not_overwrite_an_existing_blueprint_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = blueprint_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "kind: Blueprint\nmetadata:\n  name: existing\n").unwrap();

        let orchestrator = orchestrator_in(dir.path());
        orchestrator.generate(false).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("existing"));
    }

    #[test]
    fn bundle_writes_a_gzip_tar_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blueprint.yaml"), "kind: Blueprint\n").unwrap();

        let orchestrator = orchestrator_in(dir.path());
        let output = dir.path().join("out.tgz");
        let written = orchestrator.bundle(&output, "v1").unwrap();

        assert_eq!(written, output);
        assert!(output.exists());
    }
}
