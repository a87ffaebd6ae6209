//! Jsonnet evaluation for the `jsonnet(path)` helper function, via
//! `jrsonnet-evaluator`. The environment is injected as an external variable
//! named `context`, enriched with `name` (current context name) and
//! `projectName` (project-root basename); a small known helpers library is
//! injected as `helpers`; the blueprint's OCI template source is injected as
//! a plain string extVar named `ociUrl`.
//!
//! Open question (spec §9): whether `ociUrl` should override or merely
//! shadow a caller-supplied artifact URL is left undecided upstream. This
//! crate documents the extVar and does not guess a precedence rule — see
//! `DESIGN.md`.

use std::path::Path;

use jrsonnet_evaluator::trace::PathResolver;
use jrsonnet_evaluator::{State, Val};
use jrsonnet_stdlib::ContextInitializer;
use serde_yaml::Value as YamlValue;

use crate::errors::TemplateCompositionError;

/// A small standard helpers library, available to every `.jsonnet` template
/// as `std.extVar("helpers")`.
const HELPERS_SRC: &str = r#"
{
  mergePatch(base, patch):: base + patch,
  default(value, fallback):: if value == null then fallback else value,
  join(sep, items):: std.join(sep, items),
}
"#;

pub fn evaluate_jsonnet(
    path: &Path,
    env: &YamlValue,
    context_name: &str,
    project_name: &str,
    oci_url: &str,
) -> Result<YamlValue, TemplateCompositionError> {
    let enriched_context = enrich_context(env, context_name, project_name);
    let context_json = serde_json::to_string(&crate::convert::yaml_to_json(&enriched_context)).map_err(|err| {
        TemplateCompositionError::Jsonnet {
            path: path.to_path_buf(),
            message: format!("encoding context for jsonnet: {err}"),
        }
    })?;

    let state = State::default();
    state.set_context_initializer(ContextInitializer::new(state.clone(), PathResolver::new_cwd_fallback()));

    state
        .add_ext_code("context", &context_json)
        .map_err(|err| jsonnet_error(path, err))?;
    state
        .add_ext_code("helpers", HELPERS_SRC)
        .map_err(|err| jsonnet_error(path, err))?;
    state.add_ext_var("ociUrl".into(), Val::Str(oci_url.into()));

    let parsed = state.import(path).map_err(|err| jsonnet_error(path, err))?;
    let manifested = state.manifest(parsed).map_err(|err| jsonnet_error(path, err))?;

    serde_json::from_str::<serde_json::Value>(manifested.as_str()).map(crate::convert::json_to_yaml).map_err(|err| {
        TemplateCompositionError::Jsonnet {
            path: path.to_path_buf(),
            message: format!("result is not valid JSON: {err}"),
        }
    })
}

fn enrich_context(env: &YamlValue, context_name: &str, project_name: &str) -> YamlValue {
    let mut enriched = match env {
        YamlValue::Mapping(map) => map.clone(),
        _ => serde_yaml::Mapping::new(),
    };
    enriched.insert(YamlValue::String("name".into()), YamlValue::String(context_name.into()));
    enriched.insert(
        YamlValue::String("projectName".into()),
        YamlValue::String(project_name.into()),
    );
    YamlValue::Mapping(enriched)
}

fn jsonnet_error(path: &Path, err: impl std::fmt::Display) -> TemplateCompositionError {
    TemplateCompositionError::Jsonnet {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrich_context_adds_name_and_project_name() {
        let env: YamlValue = serde_yaml::from_str("provider: aws\n").unwrap();
        let enriched = enrich_context(&env, "local", "my-project");
        assert_eq!(enriched.get("name").and_then(|v| v.as_str()), Some("local"));
        assert_eq!(enriched.get("projectName").and_then(|v| v.as_str()), Some("my-project"));
        assert_eq!(enriched.get("provider").and_then(|v| v.as_str()), Some("aws"));
    }
}
