//! Assembles and transports OCI artifacts: the bundle's own gzipped tar
//! layer, pushed to or pulled from a registry via the `oci-client` crate —
//! the closest ecosystem counterpart to the teacher's own per-provider
//! registry clients in `infrastructure/models/container_registry/*`, which
//! are provider-specific (ECR, GAR, Scaleway); this engine needs to be
//! registry-agnostic since blueprint artifacts are pushed wherever the
//! caller names.

pub mod extract;
pub mod progress;
pub mod reference;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use oci_client::client::{Config as OciConfig, ClientConfig, ImageLayer};
use oci_client::manifest::{IMAGE_LAYER_GZIP_MEDIA_TYPE, OciImageManifest};
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference as ClientReference};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::errors::{ExtractionSafetyError, IOError, OCIReferenceError, OCITransportError};

/// The artifact media type this engine writes and expects to read, the
/// single-layer equivalent of the teacher's `.qovery-workspace/<id>.tgz`
/// bundles, wrapped as an OCI image instead of a bare tarball so it can be
/// pushed to and pulled from any registry.
const ARTIFACT_MEDIA_TYPE: &str = "application/vnd.windsor.blueprint.layer.v1.tar+gzip";
const TITLE_ANNOTATION: &str = "org.opencontainers.image.title";

/// Directories never included in a bundle: process-local state, not payload.
const EXCLUDED_DIRS: &[&str] = &[".windsor", ".terraform", ".git"];

struct StagedFile {
    path: String,
    content: Vec<u8>,
    mode: u32,
}

pub struct OCIArtifactEngine {
    project_root: PathBuf,
    staged: Vec<StagedFile>,
}

impl OCIArtifactEngine {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        OCIArtifactEngine {
            project_root: project_root.into(),
            staged: Vec::new(),
        }
    }

    /// Stages a file for inclusion in the next `create`.
    pub fn add_file(&mut self, path: impl Into<String>, content: Vec<u8>, mode: u32) {
        self.staged.push(StagedFile {
            path: path.into(),
            content,
            mode,
        });
    }

    fn build_layer_bytes(&self) -> Result<Vec<u8>, IOError> {
        let mut encoder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        for entry in WalkDir::new(&self.project_root).follow_links(false) {
            let entry = entry.map_err(|err| IOError::Fs {
                path: self.project_root.clone(),
                source: std::io::Error::other(err),
            })?;

            let relative = entry.path().strip_prefix(&self.project_root).unwrap_or(entry.path());
            if is_excluded(relative) {
                continue;
            }
            if relative.as_os_str().is_empty() {
                continue;
            }

            if entry.file_type().is_dir() {
                encoder.append_dir(relative, entry.path()).map_err(|source| IOError::Fs {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
            } else if entry.file_type().is_file() {
                let mut file = std::fs::File::open(entry.path()).map_err(|source| IOError::Fs {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
                encoder.append_file(relative, &mut file).map_err(|source| IOError::Fs {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
            }
        }

        for staged in &self.staged {
            let mut header = tar::Header::new_gnu();
            header.set_size(staged.content.len() as u64);
            header.set_mode(staged.mode);
            header.set_cksum();
            encoder
                .append_data(&mut header, &staged.path, staged.content.as_slice())
                .map_err(|source| IOError::Fs {
                    path: PathBuf::from(&staged.path),
                    source,
                })?;
        }

        let gz = encoder.into_inner().map_err(|source| IOError::Fs {
            path: self.project_root.clone(),
            source,
        })?;
        gz.finish().map_err(|source| IOError::Fs {
            path: self.project_root.clone(),
            source,
        })
    }

    /// Assembles staged files and the project tree into a gzipped tar
    /// layer and writes it to `output_path`, returning the path written.
    /// Written via a uniquely-named temp file then renamed into place, the
    /// same atomic-write idiom `BlueprintHandler::write` uses, so two
    /// concurrent `bundle` invocations targeting the same path never
    /// observe a partially-written artifact.
    pub fn create(&self, output_path: &Path, _tag: &str) -> Result<PathBuf, IOError> {
        let layer = self.build_layer_bytes()?;
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IOError::Fs {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp_path = output_path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        std::fs::write(&tmp_path, &layer).map_err(|source| IOError::Fs {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, output_path).map_err(|source| IOError::Fs {
            path: output_path.to_path_buf(),
            source,
        })?;

        Ok(output_path.to_path_buf())
    }

    /// Constructs the bundle in-memory and pushes it as a single-layer OCI
    /// image to `<registry_base>/<repo_name>:<tag>`.
    pub async fn push(&self, registry_base: &str, repo_name: &str, tag: &str) -> Result<(), OCITransportError> {
        let reference_str = format!("{registry_base}/{repo_name}:{tag}");
        let client_reference: ClientReference = reference_str.parse().map_err(|err| OCITransportError::Push {
            reference: reference_str.clone(),
            message: format!("invalid registry reference: {err}"),
        })?;

        let layer_bytes = self.build_layer_bytes().map_err(|err| OCITransportError::Push {
            reference: reference_str.clone(),
            message: err.to_string(),
        })?;

        let layer = ImageLayer::new(layer_bytes, ARTIFACT_MEDIA_TYPE.to_string(), None);
        let config = OciConfig::oci_v1(b"{}".to_vec(), None);

        let mut manifest = OciImageManifest::build(std::slice::from_ref(&layer), &config, None);
        manifest
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(TITLE_ANNOTATION.to_string(), tag.to_string());

        let client = Client::new(ClientConfig::default());
        client
            .push(&client_reference, &[layer], config, &RegistryAuth::Anonymous, Some(manifest))
            .await
            .map_err(|err| OCITransportError::Push {
                reference: reference_str,
                message: err.to_string(),
            })?;

        Ok(())
    }

    /// Fetches each `oci://registry/repo:tag` reference, collects its
    /// layers, decompresses them, and returns the decompressed tar bytes
    /// keyed by `registry/repo:tag` (the `oci://` scheme stripped).
    pub async fn pull(&self, oci_refs: &[String]) -> Result<BTreeMap<String, Vec<u8>>, OCITransportError> {
        let client = Client::new(ClientConfig::default());
        let mut out = BTreeMap::new();

        for raw_ref in oci_refs {
            let info = reference::parse(raw_ref).map_err(|err: OCIReferenceError| OCITransportError::Pull {
                reference: raw_ref.clone(),
                message: err.to_string(),
            })?;

            let client_reference: ClientReference = info.name.parse().map_err(|err| OCITransportError::Pull {
                reference: raw_ref.clone(),
                message: format!("invalid registry reference: {err}"),
            })?;

            let image = client
                .pull(&client_reference, &RegistryAuth::Anonymous, vec![ARTIFACT_MEDIA_TYPE, IMAGE_LAYER_GZIP_MEDIA_TYPE])
                .await
                .map_err(|err| OCITransportError::Pull {
                    reference: raw_ref.clone(),
                    message: err.to_string(),
                })?;

            let mut combined = Vec::new();
            for layer in image.layers {
                let mut decoder = GzDecoder::new(layer.data.as_slice());
                if decoder.read_to_end(&mut combined).is_err() {
                    combined.extend_from_slice(&layer.data);
                }
            }

            out.insert(reference::strip_scheme(raw_ref), combined);
        }

        Ok(out)
    }

    /// `pull` for a single reference, then walks the resulting tar and
    /// extracts only files under `templates/`, keyed by the path inside the
    /// artifact.
    pub async fn get_template_data(&self, oci_ref: &str) -> Result<BTreeMap<String, Vec<u8>>, OCITransportError> {
        let pulled = self.pull(std::slice::from_ref(&oci_ref.to_string())).await?;
        let key = reference::strip_scheme(oci_ref);
        let archive = pulled.get(&key).cloned().unwrap_or_default();

        extract_templates(&archive).map_err(|err| OCITransportError::Pull {
            reference: oci_ref.to_string(),
            message: err.to_string(),
        })
    }
}

fn is_excluded(relative: &Path) -> bool {
    relative
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .map(|first| EXCLUDED_DIRS.contains(&first))
        .unwrap_or(false)
}

fn extract_templates(archive: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, ExtractionSafetyError> {
    let mut out = BTreeMap::new();
    let mut tar = tar::Archive::new(archive);
    let entries = tar.entries().map_err(|_| ExtractionSafetyError::AbsolutePath {
        entry: "<unreadable tar stream>".to_string(),
    })?;

    for entry in entries {
        let mut entry = entry.map_err(|_| ExtractionSafetyError::AbsolutePath {
            entry: "<corrupt tar entry>".to_string(),
        })?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(|_| ExtractionSafetyError::AbsolutePath {
            entry: "<non-utf8 tar entry>".to_string(),
        })?;
        let path_str = path.to_string_lossy().replace('\\', "/");
        if !path_str.starts_with("templates/") {
            continue;
        }

        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(|_| ExtractionSafetyError::AbsolutePath {
            entry: path_str.clone(),
        })?;
        out.insert(path_str, buf);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_file_stages_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = OCIArtifactEngine::new(dir.path());
        engine.add_file("blueprint.yaml", b"kind: Blueprint\n".to_vec(), 0o644);
        assert_eq!(engine.staged.len(), 1);
    }

    #[test]
    fn create_writes_a_gzip_tar_containing_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = OCIArtifactEngine::new(dir.path());
        engine.add_file("blueprint.yaml", b"kind: Blueprint\n".to_vec(), 0o644);

        let output = dir.path().join("bundle.tgz");
        let written = engine.create(&output, "v1").unwrap();
        assert_eq!(written, output);

        let bytes = std::fs::read(&output).unwrap();
        let decoder = GzDecoder::new(bytes.as_slice());
        let mut archive = tar::Archive::new(decoder);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.path().ok().map(|p| p.to_string_lossy().to_string()))
            .collect();
        assert!(names.contains(&"blueprint.yaml".to_string()));
    }

    #[test]
    fn excludes_windsor_and_terraform_directories() {
        assert!(is_excluded(Path::new(".windsor/.tf_modules/cluster")));
        assert!(is_excluded(Path::new(".terraform/providers")));
        assert!(!is_excluded(Path::new("contexts/_template/blueprint.yaml")));
    }
}
