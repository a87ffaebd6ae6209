//! Materializes a terraform module from an OCI artifact, delegating to the
//! same `OCIArtifactEngine`/`oci::extract` pair the blueprint bundle pull path
//! uses — an artifact referenced by a component's source is pulled and
//! extracted exactly like a template artifact, just keyed and consumed
//! differently downstream.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::WindsorError;
use crate::oci::OCIArtifactEngine;
use crate::oci::progress::Spinner;
use crate::oci::{extract, reference};

/// A pull-result cache shared across every component resolved within one
/// `ModuleResolver`, per spec §4.4: pulling the same `oci://` reference twice
/// in one `ProcessModules` invocation performs one network pull.
pub type PullCache = BTreeMap<String, Vec<u8>>;

pub async fn materialize(
    project_root: &Path,
    engine: &OCIArtifactEngine,
    pulled: &mut PullCache,
    oci_ref: &str,
    subpath: &str,
) -> Result<PathBuf, WindsorError> {
    let info = reference::parse(oci_ref)?;
    let key = reference::strip_scheme(oci_ref);

    let archive = match pulled.get(&key) {
        Some(bytes) => bytes.clone(),
        None => {
            debug!(artifact = %info, "pulling terraform module artifact");
            let bytes = engine
                .pull(std::slice::from_ref(&oci_ref.to_string()))
                .await?
                .remove(&key)
                .unwrap_or_default();
            pulled.insert(key.clone(), bytes.clone());
            bytes
        }
    };

    let spinner = Spinner::start(&format!("extracting {}", info));
    let root = extract::extract_cached(project_root, &info, &archive);
    spinner.stop();
    let root = root?;

    if subpath.is_empty() {
        Ok(root)
    } else {
        Ok(root.join(subpath))
    }
}
