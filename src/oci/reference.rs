//! Parses and validates `oci://registry/repo:tag` references, per spec §4.3:
//! the `oci://` prefix is required, the remainder must contain exactly one
//! `:` separating the tag, and `repo` may itself contain path segments.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::blueprint::model::OciArtifactInfo;
use crate::errors::OCIReferenceError;

const SCHEME: &str = "oci://";

/// The tag grammar the OCI Distribution spec defines: up to 128 characters,
/// starting with a word character, and CI/CD-friendly tags like `v1.2.3` or
/// `sha-abcdef0` both match it.
static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").expect("tag pattern is valid"));

pub fn parse(reference: &str) -> Result<OciArtifactInfo, OCIReferenceError> {
    let remainder = reference.strip_prefix(SCHEME).ok_or_else(|| OCIReferenceError::MissingScheme {
        reference: reference.to_string(),
    })?;

    let colon_count = remainder.matches(':').count();
    if colon_count == 0 {
        return Err(OCIReferenceError::MissingTag {
            reference: reference.to_string(),
        });
    }
    if colon_count > 1 {
        return Err(OCIReferenceError::AmbiguousTag {
            reference: reference.to_string(),
        });
    }

    let (registry_and_repo, tag) = remainder.split_once(':').expect("colon presence checked above");
    if tag.is_empty() {
        return Err(OCIReferenceError::MissingTag {
            reference: reference.to_string(),
        });
    }

    let Some((registry, repository)) = registry_and_repo.split_once('/') else {
        return Err(OCIReferenceError::MissingRegistry {
            reference: reference.to_string(),
        });
    };
    if registry.is_empty() || repository.is_empty() {
        return Err(OCIReferenceError::MissingRegistry {
            reference: reference.to_string(),
        });
    }
    if !TAG_PATTERN.is_match(tag) {
        return Err(OCIReferenceError::InvalidTag {
            reference: reference.to_string(),
        });
    }

    Ok(OciArtifactInfo {
        name: format!("{registry}/{repository}:{tag}"),
        url: reference.to_string(),
        registry: registry.to_string(),
        repository: repository.to_string(),
        tag: tag.to_string(),
    })
}

/// The key `Pull` returns results under: `registry/repo:tag`, the `oci://`
/// scheme stripped.
pub fn strip_scheme(reference: &str) -> String {
    reference.strip_prefix(SCHEME).unwrap_or(reference).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_reference() {
        let info = parse("oci://registry.local/windsor/blueprint:v1").unwrap();
        assert_eq!(info.registry, "registry.local");
        assert_eq!(info.repository, "windsor/blueprint");
        assert_eq!(info.tag, "v1");
    }

    #[test]
    fn rejects_missing_scheme() {
        let err = parse("registry.local/windsor/blueprint:v1").unwrap_err();
        assert!(matches!(err, OCIReferenceError::MissingScheme { .. }));
    }

    #[test]
    fn rejects_missing_tag() {
        let err = parse("oci://registry.local/windsor/blueprint").unwrap_err();
        assert!(matches!(err, OCIReferenceError::MissingTag { .. }));
    }

    #[test]
    fn rejects_missing_registry() {
        let err = parse("oci://blueprint:v1").unwrap_err();
        assert!(matches!(err, OCIReferenceError::MissingRegistry { .. }));
    }

    #[test]
    fn rejects_ambiguous_tag() {
        let err = parse("oci://registry.local/windsor/blueprint:v1:extra").unwrap_err();
        assert!(matches!(err, OCIReferenceError::AmbiguousTag { .. }));
    }

    #[test]
    fn rejects_tag_with_illegal_characters() {
        let err = parse("oci://registry.local/windsor/blueprint:v1@bad").unwrap_err();
        assert!(matches!(err, OCIReferenceError::InvalidTag { .. }));
    }

    #[test]
    fn strip_scheme_removes_prefix_only() {
        assert_eq!(strip_scheme("oci://registry.local/windsor/blueprint:v1"), "registry.local/windsor/blueprint:v1");
    }
}
