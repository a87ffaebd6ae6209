//! Safe tar extraction with a presence-checked cache directory, grounded on
//! the teacher's defensive path-joining idiom in
//! `fs::workspace_directory`/`fs::root_workspace_directory` (always join
//! under a known root, create it if absent), extended here with an explicit
//! post-join prefix check because tar entries are untrusted input, which
//! local workspace paths are not.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use crate::blueprint::model::OciArtifactInfo;
use crate::errors::ExtractionSafetyError;

const EXTRACTION_CACHE_DIR: &str = ".windsor/.oci_extracted";

pub fn cache_dir(project_root: &Path, info: &OciArtifactInfo) -> PathBuf {
    project_root.join(EXTRACTION_CACHE_DIR).join(info.cache_key())
}

/// Extracts `archive` into `cache_dir(project_root, info)`, skipping
/// extraction entirely if that directory already exists. File modes are
/// masked to their low 9 bits; `.sh` entries gain the executable bits.
pub fn extract_cached(project_root: &Path, info: &OciArtifactInfo, archive: &[u8]) -> Result<PathBuf, ExtractionSafetyError> {
    let root = cache_dir(project_root, info);
    if root.exists() {
        return Ok(root);
    }

    extract_into(&root, archive)?;
    Ok(root)
}

/// Extracts every entry of `archive` under `root`, validating each entry's
/// cleaned path stays contained, independent of any cache presence check —
/// exercised directly so extraction safety is testable without a real OCI
/// pull.
pub fn extract_into(root: &Path, archive: &[u8]) -> Result<(), ExtractionSafetyError> {
    std::fs::create_dir_all(root).map_err(|_| ExtractionSafetyError::AbsolutePath {
        entry: root.display().to_string(),
    })?;

    let mut tar = tar::Archive::new(archive);
    let entries = tar.entries().map_err(|_| ExtractionSafetyError::AbsolutePath {
        entry: "<unreadable tar stream>".to_string(),
    })?;

    for entry in entries {
        let mut entry = entry.map_err(|_| ExtractionSafetyError::AbsolutePath {
            entry: "<corrupt tar entry>".to_string(),
        })?;
        let raw_path = entry.path().map_err(|_| ExtractionSafetyError::AbsolutePath {
            entry: "<non-utf8 tar entry>".to_string(),
        })?;
        let entry_name = raw_path.to_string_lossy().to_string();

        if is_absolute(&raw_path) {
            return Err(ExtractionSafetyError::AbsolutePath { entry: entry_name });
        }
        let Some(cleaned) = normalize_relative(&raw_path) else {
            return Err(ExtractionSafetyError::PathTraversal {
                entry: entry_name,
                root: root.to_path_buf(),
            });
        };

        let destination = root.join(&cleaned);
        if !destination.starts_with(root) {
            return Err(ExtractionSafetyError::PathTraversal {
                entry: entry_name,
                root: root.to_path_buf(),
            });
        }

        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&destination).map_err(|_| ExtractionSafetyError::AbsolutePath {
                entry: entry_name.clone(),
            })?;
            continue;
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|_| ExtractionSafetyError::AbsolutePath {
                entry: entry_name.clone(),
            })?;
        }

        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(|_| ExtractionSafetyError::AbsolutePath {
            entry: entry_name.clone(),
        })?;
        std::fs::write(&destination, &buf).map_err(|_| ExtractionSafetyError::AbsolutePath {
            entry: entry_name.clone(),
        })?;

        apply_mode(&destination, entry.header().mode().unwrap_or(0o644), &entry_name);
    }

    Ok(())
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32, entry_name: &str) {
    use std::os::unix::fs::PermissionsExt;

    let mut masked = mode & 0o777;
    if entry_name.ends_with(".sh") {
        masked |= 0o111;
    }
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(masked));
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32, _entry_name: &str) {}

fn is_absolute(path: &Path) -> bool {
    matches!(path.components().next(), Some(Component::RootDir) | Some(Component::Prefix(_)))
}

/// Cleans `path` lexically, resolving `..` against what has been pushed so
/// far without touching the filesystem. Returns `None` if a `..` would
/// escape above the root the entry is relative to — tar entries are
/// untrusted input, unlike the local workspace paths the teacher's own
/// path-joining idiom always starts from.
fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut cleaned = PathBuf::new();
    let mut depth: u32 = 0;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                cleaned.pop();
            }
            Component::RootDir | Component::Prefix(_) => return None,
            Component::Normal(part) => {
                depth += 1;
                cleaned.push(part);
            }
        }
    }
    Some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn extracts_entries_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_tar(&[("main.tf", b"module \"x\" {}\n")]);
        extract_into(dir.path(), &archive).unwrap();
        assert!(dir.path().join("main.tf").exists());
    }

    #[test]
    fn aborts_on_path_traversal_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_tar(&[("../escape.tf", b"evil\n")]);
        let err = extract_into(dir.path(), &archive).unwrap_err();
        assert!(matches!(err, ExtractionSafetyError::PathTraversal { .. }));
        assert!(!dir.path().parent().unwrap().join("escape.tf").exists());
    }

    #[test]
    fn aborts_on_absolute_entry() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_tar(&[("/etc/passwd", b"evil\n")]);
        let err = extract_into(dir.path(), &archive).unwrap_err();
        assert!(matches!(err, ExtractionSafetyError::AbsolutePath { .. }));
    }

    #[test]
    fn skips_extraction_when_cache_dir_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let info = OciArtifactInfo {
            name: "blueprint".into(),
            url: "oci://registry.local/windsor/blueprint:v1".into(),
            registry: "registry.local".into(),
            repository: "windsor/blueprint".into(),
            tag: "v1".into(),
        };
        let root = cache_dir(dir.path(), &info);
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("sentinel"), b"keep").unwrap();

        let archive = build_tar(&[("main.tf", b"ignored\n")]);
        let returned = extract_cached(dir.path(), &info, &archive).unwrap();

        assert_eq!(returned, root);
        assert!(root.join("sentinel").exists());
        assert!(!root.join("main.tf").exists());
    }
}
