//! Compiles and evaluates boolean/value expressions over a merged
//! configuration map, the unit of conditional gating for features,
//! components, and kustomizations, and the interpolation engine for
//! `${...}` placeholders in default values.

pub mod functions;
pub mod jsonnet;

use std::path::{Path, PathBuf};

use evalexpr::{HashMapContext, Node, Value as EvalValue, build_operator_tree};
use serde_yaml::Value as YamlValue;

use crate::config_store::ContextValues;
use crate::convert::{eval_value_to_yaml, flatten_into_context, yaml_value_to_display_string};
use crate::errors::TemplateCompositionError;

pub struct ExpressionEngine {
    project_root: PathBuf,
    context_name: String,
    oci_url: String,
}

impl ExpressionEngine {
    pub fn new(project_root: impl Into<PathBuf>, context_name: impl Into<String>, oci_url: impl Into<String>) -> Self {
        ExpressionEngine {
            project_root: project_root.into(),
            context_name: context_name.into(),
            oci_url: oci_url.into(),
        }
    }

    pub fn evaluate_bool(&self, expr: &str, env: &ContextValues, feature_path: &Path) -> Result<bool, TemplateCompositionError> {
        let value = self.evaluate_raw(expr, env, feature_path)?;
        match value {
            EvalValue::Boolean(b) => Ok(b),
            _ => Err(TemplateCompositionError::NotBoolean {
                expr: expr.to_string(),
                feature_path: path_str(feature_path),
            }),
        }
    }

    pub fn evaluate_value(&self, expr: &str, env: &ContextValues, feature_path: &Path) -> Result<YamlValue, TemplateCompositionError> {
        self.evaluate_raw(expr, env, feature_path).map(eval_value_to_yaml)
    }

    /// Recurses into maps and sequences of `map`, interpolating `${...}`
    /// placeholders found in string leaves. A string that is *exactly* one
    /// placeholder yields the evaluated value type-preserved; any other
    /// string has every placeholder substituted in and the concatenated
    /// result produced as a string. Non-string scalars pass through
    /// untouched.
    pub fn evaluate_defaults(&self, map: &YamlValue, env: &ContextValues, feature_path: &Path) -> Result<YamlValue, TemplateCompositionError> {
        match map {
            YamlValue::Mapping(m) => {
                let mut out = serde_yaml::Mapping::new();
                for (k, v) in m {
                    out.insert(k.clone(), self.evaluate_defaults(v, env, feature_path)?);
                }
                Ok(YamlValue::Mapping(out))
            }
            YamlValue::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.evaluate_defaults(item, env, feature_path)?);
                }
                Ok(YamlValue::Sequence(out))
            }
            YamlValue::String(s) => self.interpolate_string(s, env, feature_path),
            other => Ok(other.clone()),
        }
    }

    fn interpolate_string(&self, s: &str, env: &ContextValues, feature_path: &Path) -> Result<YamlValue, TemplateCompositionError> {
        if let Some(inner) = whole_placeholder(s) {
            return self.evaluate_value(inner, env, feature_path);
        }

        let mut result = String::new();
        let mut rest = s;
        loop {
            match find_placeholder(rest, feature_path)? {
                None => {
                    result.push_str(rest);
                    break;
                }
                Some((before, inner, after)) => {
                    result.push_str(before);
                    let value = self.evaluate_value(inner, env, feature_path)?;
                    result.push_str(&yaml_value_to_display_string(&value));
                    rest = after;
                }
            }
        }
        Ok(YamlValue::String(result))
    }

    fn evaluate_raw(&self, expr: &str, env: &ContextValues, feature_path: &Path) -> Result<EvalValue, TemplateCompositionError> {
        let context = self.build_context(env, feature_path);
        let node: Node = build_operator_tree(expr).map_err(|source| TemplateCompositionError::Compile {
            expr: expr.to_string(),
            feature_path: path_str(feature_path),
            source,
        })?;

        node.eval_with_context(&context).map_err(|source| TemplateCompositionError::Evaluate {
            expr: expr.to_string(),
            feature_path: path_str(feature_path),
            source,
        })
    }

    fn build_context(&self, env: &ContextValues, feature_path: &Path) -> HashMapContext {
        let mut ctx = HashMapContext::new();
        flatten_into_context(env.as_value(), "", &mut ctx);

        let feature_dir = feature_path.parent().map(Path::to_path_buf);
        functions::register_file(&mut ctx, self.project_root.clone(), feature_dir.clone());
        functions::register_jsonnet(
            &mut ctx,
            self.project_root.clone(),
            feature_dir,
            self.context_name.clone(),
            self.oci_url.clone(),
            env.clone(),
        );

        ctx
    }
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

/// Returns the inner expression if `s` is exactly one `${...}` placeholder
/// spanning the whole string.
fn whole_placeholder(s: &str) -> Option<&str> {
    let trimmed = s.strip_prefix("${")?.strip_suffix('}')?;
    if trimmed.contains("${") {
        return None;
    }
    Some(trimmed)
}

/// Finds the next `${...}` placeholder in `s`, returning the text before it,
/// the inner expression, and the text after the closing `}`. Returns an
/// error if a `${` is opened without a matching `}`.
fn find_placeholder<'a>(s: &'a str, feature_path: &Path) -> Result<Option<(&'a str, &'a str, &'a str)>, TemplateCompositionError> {
    let Some(start) = s.find("${") else {
        return Ok(None);
    };
    let after_open = &s[start + 2..];
    let Some(close_offset) = after_open.find('}') else {
        return Err(TemplateCompositionError::UnclosedInterpolation {
            feature_path: path_str(feature_path),
            text: s.to_string(),
        });
    };

    let before = &s[..start];
    let inner = &after_open[..close_offset];
    let after = &after_open[close_offset + 1..];
    Ok(Some((before, inner, after)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ExpressionEngine {
        ExpressionEngine::new("/project", "local", "oci://registry.local/windsor/blueprint:latest")
    }

    fn env_from(yaml: &str) -> ContextValues {
        ContextValues::from_value(serde_yaml::from_str(yaml).unwrap())
    }

    #[test]
    fn evaluate_bool_handles_equality_and_dotted_access() {
        let eng = engine();
        let env = env_from("provider: aws\nobservability:\n  enabled: true\n");
        assert!(eng
            .evaluate_bool("provider == \"aws\"", &env, Path::new("features/aws.yaml"))
            .unwrap());
        assert!(eng
            .evaluate_bool("observability.enabled == true", &env, Path::new("features/obs.yaml"))
            .unwrap());
        assert!(!eng
            .evaluate_bool("provider == \"gcp\"", &env, Path::new("features/gcp.yaml"))
            .unwrap());
    }

    #[test]
    fn evaluate_bool_rejects_non_boolean_result() {
        let eng = engine();
        let env = env_from("provider: aws\n");
        let err = eng.evaluate_bool("provider", &env, Path::new("features/aws.yaml")).unwrap_err();
        assert!(matches!(err, TemplateCompositionError::NotBoolean { .. }));
    }

    #[test]
    fn evaluate_bool_rejects_uncompilable_expression() {
        let eng = engine();
        let env = env_from("provider: aws\n");
        let err = eng.evaluate_bool("provider ===", &env, Path::new("features/aws.yaml")).unwrap_err();
        assert!(matches!(err, TemplateCompositionError::Compile { .. }));
    }

    #[test]
    fn evaluate_defaults_preserves_type_for_whole_string_placeholder() {
        let eng = engine();
        let env = env_from("replicas: 3\n");
        let defaults: YamlValue = serde_yaml::from_str("count: \"${replicas}\"\n").unwrap();
        let result = eng.evaluate_defaults(&defaults, &env, Path::new("features/x.yaml")).unwrap();
        assert_eq!(result.get("count"), Some(&YamlValue::Number(3.into())));
    }

    #[test]
    fn evaluate_defaults_interpolates_inline_placeholders_as_strings() {
        let eng = engine();
        let env = env_from("name: prod\n");
        let defaults: YamlValue = serde_yaml::from_str("greeting: \"hello-${name}-cluster\"\n").unwrap();
        let result = eng.evaluate_defaults(&defaults, &env, Path::new("features/x.yaml")).unwrap();
        assert_eq!(result.get("greeting"), Some(&YamlValue::String("hello-prod-cluster".into())));
    }

    #[test]
    fn evaluate_defaults_passes_through_non_string_scalars() {
        let eng = engine();
        let env = env_from("name: prod\n");
        let defaults: YamlValue = serde_yaml::from_str("enabled: true\ncount: 5\n").unwrap();
        let result = eng.evaluate_defaults(&defaults, &env, Path::new("features/x.yaml")).unwrap();
        assert_eq!(result.get("enabled"), Some(&YamlValue::Bool(true)));
        assert_eq!(result.get("count"), Some(&YamlValue::Number(5.into())));
    }

    #[test]
    fn unclosed_interpolation_is_an_error() {
        let eng = engine();
        let env = env_from("name: prod\n");
        let defaults: YamlValue = serde_yaml::from_str("greeting: \"hello-${name-cluster\"\n").unwrap();
        let err = eng.evaluate_defaults(&defaults, &env, Path::new("features/x.yaml")).unwrap_err();
        assert!(matches!(err, TemplateCompositionError::UnclosedInterpolation { .. }));
    }
}
