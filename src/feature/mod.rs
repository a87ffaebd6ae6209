//! Evaluates each feature's `when` clause, filters its components and
//! kustomizations by their own `when`, evaluates input expressions, then
//! merges survivors into a single effective blueprint. A pure, in-memory
//! transform: no I/O happens here, mirroring how the teacher keeps its chart
//! builders (`infrastructure/helm_charts/*`) pure value constructors fed
//! into a separate imperative driver.

use std::collections::BTreeMap;

use crate::blueprint::model::{Blueprint, Feature, Kustomization, TerraformComponent};
use crate::config_store::ContextValues;
use crate::convert::yaml_value_to_display_string;
use crate::errors::TemplateCompositionError;
use crate::expression::ExpressionEngine;

pub struct FeatureComposer<'a> {
    engine: &'a ExpressionEngine,
}

impl<'a> FeatureComposer<'a> {
    pub fn new(engine: &'a ExpressionEngine) -> Self {
        FeatureComposer { engine }
    }

    /// Composes `base` with every feature in `features` whose `when` clause
    /// (if any) evaluates true, in the order given — callers are expected to
    /// have already sorted `features` by file name, per spec §4.2/§5. When
    /// the merged result is non-empty, `metadata.name` becomes
    /// `context_name` and `metadata.description` becomes `"Blueprint for
    /// <context_name> context"`; an empty result leaves metadata untouched.
    pub fn compose(&self, base: Blueprint, features: &[Feature], env: &ContextValues, context_name: &str) -> Result<Blueprint, TemplateCompositionError> {
        let mut composed = base;

        for feature in features {
            if let Some(when) = &feature.when {
                if !self.engine.evaluate_bool(when, env, &feature.path)? {
                    continue;
                }
            }

            for declared in &feature.terraform_components {
                if let Some(when) = &declared.when {
                    if !self.engine.evaluate_bool(when, env, &feature.path)? {
                        continue;
                    }
                }

                let inputs = self.engine.evaluate_defaults(&serde_yaml::Value::Mapping(declared.inputs.clone()), env, &feature.path)?;
                let mut component = declared.component.clone();
                component.inputs = drop_nil_entries(inputs);
                composed.terraform_components.push(component);
            }

            for declared in &feature.kustomizations {
                if let Some(when) = &declared.when {
                    if !self.engine.evaluate_bool(when, env, &feature.path)? {
                        continue;
                    }
                }

                let substitutions = self.engine.evaluate_defaults(&serde_yaml::Value::Mapping(declared.substitutions.clone()), env, &feature.path)?;
                let mut kustomization = declared.kustomization.clone();
                kustomization.substitutions = coerce_substitutions(substitutions);
                composed.kustomizations.push(kustomization);
            }
        }

        if !composed.is_empty() {
            composed.metadata.name = context_name.to_string();
            composed.metadata.description = format!("Blueprint for {context_name} context");
        }

        Ok(composed)
    }
}

fn drop_nil_entries(value: serde_yaml::Value) -> serde_yaml::Mapping {
    match value {
        serde_yaml::Value::Mapping(map) => map
            .into_iter()
            .filter(|(_, v)| !matches!(v, serde_yaml::Value::Null))
            .collect(),
        _ => serde_yaml::Mapping::new(),
    }
}

fn coerce_substitutions(value: serde_yaml::Value) -> BTreeMap<String, String> {
    match value {
        serde_yaml::Value::Mapping(map) => map
            .into_iter()
            .filter_map(|(k, v)| {
                let key = k.as_str()?.to_string();
                Some((key, yaml_value_to_display_string(&v)))
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// `MergeFeatures([])` returns no blueprint (nil-equivalent): an empty list
/// composed against an empty base yields an empty blueprint whose component
/// count is zero, matching §8 invariant 6. For any non-empty list, the
/// merged component count equals the sum of surviving per-feature counts.
pub fn merge_features(
    engine: &ExpressionEngine,
    features: &[Feature],
    env: &ContextValues,
    context_name: &str,
) -> Result<Option<Blueprint>, TemplateCompositionError> {
    let composer = FeatureComposer::new(engine);
    let composed = composer.compose(Blueprint::default(), features, env, context_name)?;
    if composed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(composed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::model::{FeatureKustomization, FeatureTerraformComponent};
    use std::path::PathBuf;

    fn engine() -> ExpressionEngine {
        ExpressionEngine::new("/project", "local", "oci://registry.local/windsor/blueprint:latest")
    }

    fn aws_feature() -> Feature {
        Feature {
            when: Some("provider == \"aws\"".into()),
            path: PathBuf::from("features/aws.yaml"),
            terraform_components: vec![FeatureTerraformComponent {
                when: None,
                component: TerraformComponent {
                    source: "s1".into(),
                    path: "cluster/aws".into(),
                    ..Default::default()
                },
                inputs: Default::default(),
            }],
            ..Default::default()
        }
    }

    fn gcp_feature() -> Feature {
        Feature {
            when: Some("provider == \"gcp\"".into()),
            path: PathBuf::from("features/gcp.yaml"),
            terraform_components: vec![FeatureTerraformComponent {
                when: None,
                component: TerraformComponent {
                    source: "s2".into(),
                    path: "cluster/gcp".into(),
                    ..Default::default()
                },
                inputs: Default::default(),
            }],
            ..Default::default()
        }
    }

    fn observability_feature() -> Feature {
        Feature {
            when: Some("observability.enabled == true".into()),
            path: PathBuf::from("features/observability.yaml"),
            kustomizations: vec![FeatureKustomization {
                when: None,
                kustomization: Kustomization {
                    name: "observability".into(),
                    path: "observability".into(),
                    ..Default::default()
                },
                substitutions: Default::default(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn feature_gating_selects_only_matching_features() {
        let eng = engine();
        let env = ContextValues::from_value(
            serde_yaml::from_str("name: local\nprovider: aws\nobservability:\n  enabled: true\n").unwrap(),
        );
        let features = vec![aws_feature(), gcp_feature(), observability_feature()];
        let composer = FeatureComposer::new(&eng);
        let composed = composer.compose(Blueprint::default(), &features, &env, "local").unwrap();

        assert_eq!(composed.terraform_components.len(), 1);
        assert_eq!(composed.terraform_components[0].path, "cluster/aws");
        assert_eq!(composed.kustomizations.len(), 1);
        assert_eq!(composed.metadata.name, "local");
        assert_eq!(composed.metadata.description, "Blueprint for local context");
    }

    #[test]
    fn merge_features_of_empty_list_yields_no_blueprint() {
        let eng = engine();
        let env = ContextValues::empty();
        assert!(merge_features(&eng, &[], &env, "local").unwrap().is_none());
    }

    #[test]
    fn merge_features_sums_surviving_component_counts() {
        let eng = engine();
        let env = ContextValues::from_value(serde_yaml::from_str("provider: aws\n").unwrap());
        let features = vec![aws_feature(), gcp_feature()];
        let merged = merge_features(&eng, &features, &env, "local").unwrap().unwrap();
        assert_eq!(merged.terraform_components.len(), 1);
    }

    #[test]
    fn feature_with_no_when_is_always_active() {
        let eng = engine();
        let env = ContextValues::empty();
        let mut feature = aws_feature();
        feature.when = None;
        let composer = FeatureComposer::new(&eng);
        let composed = composer.compose(Blueprint::default(), &[feature], &env, "local").unwrap();
        assert_eq!(composed.terraform_components.len(), 1);
    }

    #[test]
    fn feature_when_evaluating_non_bool_fails_compilation_with_no_partial_inclusion() {
        let eng = engine();
        let env = ContextValues::from_value(serde_yaml::from_str("provider: aws\n").unwrap());
        let mut feature = aws_feature();
        feature.when = Some("provider".into());
        let composer = FeatureComposer::new(&eng);
        let err = composer.compose(Blueprint::default(), &[feature], &env, "local").unwrap_err();
        assert!(matches!(err, TemplateCompositionError::NotBoolean { .. }));
    }
}
