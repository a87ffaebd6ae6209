//! `kube::Client`-backed `ReconciliationDriver`, modeled directly on the
//! teacher's `services/kube_client.rs` `QubeClient`: `Api::namespaced` for
//! namespace-scoped resources, `Patch::Apply` + `PatchParams::apply` for
//! idempotent upserts, and `is_error_code(&e, 404)` treated as absent rather
//! than fatal.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::api::{Api, ObjectMeta, Patch, PatchParams};

use super::ReconciliationDriver;
use super::crds::{
    DependsOnRef, GitRepository, GitRepositoryRef, GitRepositorySpec, Kustomization as KustomizationCrd,
    KustomizationSpec, LocalObjectReference, PostBuild, SourceRef, SubstituteFrom,
};
use crate::blueprint::model::{Kustomization, Repository, Source};
use crate::errors::ReconciliationError;

const FIELD_MANAGER: &str = "windsor-core";
const NAMESPACE: &str = "windsor-system";

pub struct KubeReconciliationDriver {
    client: kube::Client,
}

impl KubeReconciliationDriver {
    pub fn new(client: kube::Client) -> Self {
        KubeReconciliationDriver { client }
    }

    fn is_error_code(err: &kube::Error, code: u16) -> bool {
        matches!(err, kube::Error::Api(resp) if resp.code == code)
    }

    fn git_repository_spec(url: &str, secret_name: &Option<String>, reference: &crate::blueprint::model::Reference) -> GitRepositorySpec {
        GitRepositorySpec {
            url: url.to_string(),
            secret_ref: secret_name.clone().map(|name| LocalObjectReference { name }),
            reference: GitRepositoryRef {
                branch: reference.branch.clone(),
                tag: reference.tag.clone(),
                commit: reference.commit.clone(),
                semver: reference.semver.clone(),
            },
            interval: "1m".to_string(),
        }
    }
}

#[async_trait]
impl ReconciliationDriver for KubeReconciliationDriver {
    async fn create_namespace(&self, name: &str) -> Result<(), ReconciliationError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&namespace))
            .await
            .map_err(|err| ReconciliationError::ClusterClient {
                operation: format!("create_namespace({name})"),
                message: err.to_string(),
            })?;
        Ok(())
    }

    async fn apply_git_repository(&self, name: &str, repository: &Repository) -> Result<(), ReconciliationError> {
        let api: Api<GitRepository> = Api::namespaced(self.client.clone(), NAMESPACE);
        let spec = Self::git_repository_spec(&repository.url, &repository.secret_name, &repository.effective_reference());
        let resource = GitRepository::new(name, spec);

        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&resource))
            .await
            .map_err(|err| ReconciliationError::ClusterClient {
                operation: format!("apply_git_repository({name})"),
                message: err.to_string(),
            })?;
        Ok(())
    }

    async fn apply_source_git_repository(&self, source: &Source) -> Result<(), ReconciliationError> {
        let api: Api<GitRepository> = Api::namespaced(self.client.clone(), NAMESPACE);
        let spec = Self::git_repository_spec(&source.url, &source.secret_name, &source.reference);
        let resource = GitRepository::new(&source.name, spec);

        api.patch(&source.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&resource))
            .await
            .map_err(|err| ReconciliationError::ClusterClient {
                operation: format!("apply_source_git_repository({})", source.name),
                message: err.to_string(),
            })?;
        Ok(())
    }

    async fn apply_config_map(&self, name: &str, namespace: &str, data: &BTreeMap<String, String>) -> Result<(), ReconciliationError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(data.clone().into_iter().collect()),
            ..Default::default()
        };

        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&config_map))
            .await
            .map_err(|err| ReconciliationError::ClusterClient {
                operation: format!("apply_config_map({name})"),
                message: err.to_string(),
            })?;
        Ok(())
    }

    async fn apply_kustomization(&self, kustomization: &Kustomization) -> Result<(), ReconciliationError> {
        let api: Api<KustomizationCrd> = Api::namespaced(self.client.clone(), NAMESPACE);

        let source_ref = kustomization.source_ref.clone().map(|name| SourceRef {
            kind: "GitRepository".to_string(),
            name,
        });

        let substitute_from = if kustomization.substitutions.is_empty() {
            Vec::new()
        } else {
            vec![SubstituteFrom {
                kind: "ConfigMap".to_string(),
                name: kustomization.name.clone(),
            }]
        };

        let spec = KustomizationSpec {
            path: format!("./{}", kustomization.path),
            source_ref,
            depends_on: kustomization.depends_on.iter().map(|name| DependsOnRef { name: name.clone() }).collect(),
            patches: kustomization
                .patches
                .iter()
                .map(|p| serde_json::to_value(p).unwrap_or(serde_json::Value::Null))
                .collect(),
            interval: kustomization.interval.clone().unwrap_or_else(|| "1m".to_string()),
            retry_interval: kustomization.retry_interval.clone(),
            timeout: kustomization.timeout.clone(),
            wait: kustomization.wait,
            force: kustomization.force,
            target_namespace: None,
            post_build: if substitute_from.is_empty() {
                None
            } else {
                Some(PostBuild { substitute_from })
            },
        };

        let resource = KustomizationCrd::new(&kustomization.name, spec);

        api.patch(&kustomization.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&resource))
            .await
            .map_err(|err| ReconciliationError::ClusterClient {
                operation: format!("apply_kustomization({})", kustomization.name),
                message: err.to_string(),
            })?;
        Ok(())
    }

    async fn delete_kustomization(&self, name: &str, namespace: &str) -> Result<(), ReconciliationError> {
        let api: Api<KustomizationCrd> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(err) if Self::is_error_code(&err, 404) => Ok(()),
            Err(err) => Err(ReconciliationError::ClusterClient {
                operation: format!("delete_kustomization({name})"),
                message: err.to_string(),
            }),
        }
    }

    async fn check_git_repository_status(&self) -> Result<(), ReconciliationError> {
        let api: Api<GitRepository> = Api::namespaced(self.client.clone(), NAMESPACE);
        let list = api.list(&Default::default()).await.map_err(|err| ReconciliationError::ClusterClient {
            operation: "check_git_repository_status".to_string(),
            message: err.to_string(),
        })?;

        let not_ready: Vec<&str> = list
            .items
            .iter()
            .filter(|repo| !status_ready(repo.status.as_ref().map(|s| &s.conditions)))
            .filter_map(|repo| repo.metadata.name.as_deref())
            .collect();

        if not_ready.is_empty() {
            Ok(())
        } else {
            Err(ReconciliationError::ClusterClient {
                operation: "check_git_repository_status".to_string(),
                message: format!("not ready: {}", not_ready.join(", ")),
            })
        }
    }

    async fn get_kustomization_status(&self, names: &[String]) -> Result<BTreeMap<String, bool>, ReconciliationError> {
        let api: Api<KustomizationCrd> = Api::namespaced(self.client.clone(), NAMESPACE);
        let mut statuses = BTreeMap::new();

        for name in names {
            match api.get(name).await {
                Ok(resource) => {
                    let ready = status_ready(resource.status.as_ref().map(|s| &s.conditions));
                    statuses.insert(name.clone(), ready);
                }
                Err(err) if Self::is_error_code(&err, 404) => {
                    statuses.insert(name.clone(), false);
                }
                Err(err) => {
                    return Err(ReconciliationError::ClusterClient {
                        operation: format!("get_kustomization_status({name})"),
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(statuses)
    }
}

fn status_ready(conditions: Option<&Vec<super::crds::Condition>>) -> bool {
    conditions.map(|conds| conds.iter().any(super::crds::Condition::is_ready)).unwrap_or(false)
}
