//! Helper functions injected into every expression context: `file(path)` and
//! `jsonnet(path)`. Both share the same relative-path resolution rule:
//! relative to the feature file's directory when one is known, otherwise
//! relative to the project root; absolute paths are cleaned and used as-is.

use std::path::{Path, PathBuf};

use evalexpr::{ContextWithMutableFunctions, EvalexprError, Function, HashMapContext, Value as EvalValue};

use super::jsonnet;
use crate::config_store::ContextValues;

/// Resolves `path` against `feature_dir` if one is set, else `project_root`.
/// Absolute paths are cleaned (no `..` normalization needed: `std::fs`
/// rejects `..` naturally by resolving through the real filesystem) and used
/// verbatim.
pub fn resolve_path(project_root: &Path, feature_dir: Option<&Path>, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return clean_path(candidate);
    }

    match feature_dir {
        Some(dir) => dir.join(candidate),
        None => project_root.join(candidate),
    }
}

fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        use std::path::Component::*;
        match component {
            CurDir => {}
            ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

pub fn register_file(ctx: &mut HashMapContext, project_root: PathBuf, feature_dir: Option<PathBuf>) {
    let _ = ctx.set_function(
        "file".to_string(),
        Function::new(move |argument| {
            let path = argument.as_string()?;
            let resolved = resolve_path(&project_root, feature_dir.as_deref(), &path);
            std::fs::read_to_string(&resolved)
                .map(EvalValue::String)
                .map_err(|err| EvalexprError::CustomMessage(format!("file(\"{path}\"): {err}")))
        }),
    );
}

pub fn register_jsonnet(
    ctx: &mut HashMapContext,
    project_root: PathBuf,
    feature_dir: Option<PathBuf>,
    context_name: String,
    oci_url: String,
    env: ContextValues,
) {
    let _ = ctx.set_function(
        "jsonnet".to_string(),
        Function::new(move |argument| {
            let path = argument.as_string()?;
            let resolved = resolve_path(&project_root, feature_dir.as_deref(), &path);
            let project_name = project_root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            jsonnet::evaluate_jsonnet(&resolved, env.as_value(), &context_name, &project_name, &oci_url)
                .map(yaml_to_eval)
                .map_err(|err| EvalexprError::CustomMessage(err.to_string()))
        }),
    );
}

fn yaml_to_eval(value: serde_yaml::Value) -> EvalValue {
    match value {
        serde_yaml::Value::String(s) => EvalValue::String(s),
        serde_yaml::Value::Bool(b) => EvalValue::Boolean(b),
        serde_yaml::Value::Number(n) => n
            .as_i64()
            .map(EvalValue::Int)
            .unwrap_or_else(|| EvalValue::Float(n.as_f64().unwrap_or_default())),
        serde_yaml::Value::Null => EvalValue::Empty,
        serde_yaml::Value::Sequence(seq) => EvalValue::Tuple(seq.into_iter().map(yaml_to_eval).collect()),
        other => EvalValue::String(serde_yaml::to_string(&other).unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_prefers_feature_dir_over_project_root() {
        let project_root = Path::new("/project");
        let feature_dir = Path::new("/project/contexts/_template/features");
        let resolved = resolve_path(project_root, Some(feature_dir), "payload.txt");
        assert_eq!(resolved, feature_dir.join("payload.txt"));
    }

    #[test]
    fn resolve_path_falls_back_to_project_root() {
        let project_root = Path::new("/project");
        let resolved = resolve_path(project_root, None, "payload.txt");
        assert_eq!(resolved, project_root.join("payload.txt"));
    }

    #[test]
    fn resolve_path_cleans_absolute_paths() {
        let resolved = resolve_path(Path::new("/project"), None, "/etc/../etc/hosts");
        assert_eq!(resolved, PathBuf::from("/etc/hosts"));
    }
}
