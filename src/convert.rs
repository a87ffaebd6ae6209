//! Conversions between `serde_yaml::Value`, `serde_json::Value`, and
//! `evalexpr::Value`, shared by the expression engine, the jsonnet helper,
//! and the feature composer.

use evalexpr::{ContextWithMutableVariables, HashMapContext, Value as EvalValue};
use serde_yaml::Value as YamlValue;

pub fn yaml_to_json(value: &YamlValue) -> serde_json::Value {
    match value {
        YamlValue::Null => serde_json::Value::Null,
        YamlValue::Bool(b) => serde_json::Value::Bool(*b),
        YamlValue::Number(n) => yaml_number_to_json(n),
        YamlValue::String(s) => serde_json::Value::String(s.clone()),
        YamlValue::Sequence(seq) => serde_json::Value::Array(seq.iter().map(yaml_to_json).collect()),
        YamlValue::Mapping(map) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in map {
                if let Some(key) = k.as_str() {
                    obj.insert(key.to_string(), yaml_to_json(v));
                }
            }
            serde_json::Value::Object(obj)
        }
        YamlValue::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

fn yaml_number_to_json(n: &serde_yaml::Number) -> serde_json::Value {
    if let Some(i) = n.as_i64() {
        serde_json::Value::Number(i.into())
    } else if let Some(u) = n.as_u64() {
        serde_json::Value::Number(u.into())
    } else {
        serde_json::Number::from_f64(n.as_f64().unwrap_or_default())
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

pub fn json_to_yaml(value: serde_json::Value) -> YamlValue {
    match value {
        serde_json::Value::Null => YamlValue::Null,
        serde_json::Value::Bool(b) => YamlValue::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                YamlValue::Number(i.into())
            } else if let Some(f) = n.as_f64() {
                YamlValue::Number(f.into())
            } else {
                YamlValue::Null
            }
        }
        serde_json::Value::String(s) => YamlValue::String(s),
        serde_json::Value::Array(arr) => YamlValue::Sequence(arr.into_iter().map(json_to_yaml).collect()),
        serde_json::Value::Object(obj) => {
            let mut map = serde_yaml::Mapping::new();
            for (k, v) in obj {
                map.insert(YamlValue::String(k), json_to_yaml(v));
            }
            YamlValue::Mapping(map)
        }
    }
}

/// Flattens a mapping into dotted-identifier variables an `evalexpr` context
/// can look up directly (`observability.enabled`), since `evalexpr`
/// identifiers may contain dots.
pub fn flatten_into_context(value: &YamlValue, prefix: &str, ctx: &mut HashMapContext) {
    match value {
        YamlValue::Mapping(map) => {
            for (k, v) in map {
                let Some(key) = k.as_str() else { continue };
                let dotted = if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into_context(v, &dotted, ctx);
            }
        }
        other => {
            if !prefix.is_empty() {
                if let Some(v) = yaml_scalar_to_eval(other) {
                    let _ = ctx.set_value(prefix.to_string(), v);
                }
            }
        }
    }
}

fn yaml_scalar_to_eval(value: &YamlValue) -> Option<EvalValue> {
    match value {
        YamlValue::Null => Some(EvalValue::Empty),
        YamlValue::Bool(b) => Some(EvalValue::Boolean(*b)),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(EvalValue::Int(i))
            } else {
                n.as_f64().map(EvalValue::Float)
            }
        }
        YamlValue::String(s) => Some(EvalValue::String(s.clone())),
        YamlValue::Sequence(seq) => seq.iter().map(yaml_scalar_to_eval).collect::<Option<Vec<_>>>().map(EvalValue::Tuple),
        _ => None,
    }
}

pub fn eval_value_to_yaml(value: EvalValue) -> YamlValue {
    match value {
        EvalValue::String(s) => YamlValue::String(s),
        EvalValue::Float(f) => YamlValue::Number(f.into()),
        EvalValue::Int(i) => YamlValue::Number(i.into()),
        EvalValue::Boolean(b) => YamlValue::Bool(b),
        EvalValue::Tuple(values) => YamlValue::Sequence(values.into_iter().map(eval_value_to_yaml).collect()),
        EvalValue::Empty => YamlValue::Null,
    }
}

pub fn yaml_value_to_display_string(value: &YamlValue) -> String {
    match value {
        YamlValue::String(s) => s.clone(),
        YamlValue::Null => String::new(),
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim_end().to_string(),
    }
}

/// Recursively merges `overlay` into `base`: mappings merge key-by-key,
/// anything else in `overlay` replaces `base` outright.
pub fn merge_yaml(base: YamlValue, overlay: YamlValue) -> YamlValue {
    match (base, overlay) {
        (YamlValue::Mapping(mut base_map), YamlValue::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                let existing = base_map.remove(&k);
                let merged = match existing {
                    Some(existing_value) => merge_yaml(existing_value, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            YamlValue::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalexpr::Context;

    #[test]
    fn flattens_nested_mappings_into_dotted_identifiers() {
        let yaml: YamlValue = serde_yaml::from_str(
            "provider: aws\nobservability:\n  enabled: true\n  replicas: 3\n",
        )
        .unwrap();
        let mut ctx = HashMapContext::new();
        flatten_into_context(&yaml, "", &mut ctx);

        assert_eq!(ctx.get_value("provider"), Some(&EvalValue::String("aws".into())));
        assert_eq!(ctx.get_value("observability.enabled"), Some(&EvalValue::Boolean(true)));
        assert_eq!(ctx.get_value("observability.replicas"), Some(&EvalValue::Int(3)));
    }

    #[test]
    fn merge_yaml_overlays_nested_keys() {
        let base: YamlValue = serde_yaml::from_str("a: 1\nnested:\n  x: 1\n  y: 1\n").unwrap();
        let overlay: YamlValue = serde_yaml::from_str("nested:\n  y: 2\n  z: 3\n").unwrap();
        let merged = merge_yaml(base, overlay);
        let expected: YamlValue = serde_yaml::from_str("a: 1\nnested:\n  x: 1\n  y: 2\n  z: 3\n").unwrap();
        assert_eq!(merged, expected);
    }
}
