//! Parses the fully qualified component source strings `BlueprintHandler::generate`
//! produces (see `qualify_source` in `blueprint::handler`): either
//! `git-url//path_prefix/path?ref=X` or `oci://reg/repo:tag//path_prefix/path`.

use crate::errors::ModuleResolutionError;

#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedSource {
    Git { url: String, reference: String, subpath: String },
    Oci { oci_ref: String, subpath: String },
}

/// Splits a fully qualified source into its resolver-dispatch shape. Dispatch
/// itself (git vs oci) turns on the `oci://` prefix alone, per spec §4.4.
pub fn parse(source: &str) -> Result<ResolvedSource, ModuleResolutionError> {
    if let Some(rest) = source.strip_prefix("oci://") {
        let (body, subpath) = rest.split_once("//").ok_or_else(|| ModuleResolutionError::MalformedSource {
            source: source.to_string(),
            message: "oci source is missing the `//` subpath separator".to_string(),
        })?;
        if body.is_empty() {
            return Err(ModuleResolutionError::MalformedSource {
                source: source.to_string(),
                message: "oci source has an empty registry/repository/tag segment".to_string(),
            });
        }
        return Ok(ResolvedSource::Oci {
            oci_ref: format!("oci://{body}"),
            subpath: subpath.to_string(),
        });
    }

    let (unref, reference) = source.split_once("?ref=").ok_or_else(|| ModuleResolutionError::MalformedSource {
        source: source.to_string(),
        message: "git source is missing the `?ref=` pin".to_string(),
    })?;
    if reference.is_empty() {
        return Err(ModuleResolutionError::MalformedSource {
            source: source.to_string(),
            message: "git source has an empty `?ref=` pin".to_string(),
        });
    }

    let (url, subpath) = split_url_subpath(unref).ok_or_else(|| ModuleResolutionError::MalformedSource {
        source: source.to_string(),
        message: "git source is missing the `//` subpath separator".to_string(),
    })?;
    if url.is_empty() {
        return Err(ModuleResolutionError::MalformedSource {
            source: source.to_string(),
            message: "git source has an empty repository url".to_string(),
        });
    }

    Ok(ResolvedSource::Git {
        url: url.to_string(),
        reference: reference.to_string(),
        subpath: subpath.to_string(),
    })
}

/// Splits `<url>//<subpath>` on the path-prefix separator, skipping past a
/// leading URL scheme's own `://` first so a scheme like `https://` is never
/// mistaken for the separator (plain `split_once("//")` would split
/// `https://example.com/infra.git//modules/cluster` into `"https:"` and
/// `"example.com/infra.git//modules/cluster"`).
fn split_url_subpath(unref: &str) -> Option<(&str, &str)> {
    let search_from = unref.find("://").map(|i| i + 3).unwrap_or(0);
    let offset = unref[search_from..].find("//")?;
    let split_at = search_from + offset;
    Some((&unref[..split_at], &unref[split_at + 2..]))
}
