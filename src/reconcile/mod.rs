//! The reconciliation contract (§4.6): a cluster-manager collaborator the
//! `BlueprintHandler` drives through `Install`/`WaitForKustomizations`/`Down`.
//! Kept as a trait object boundary exactly the way the teacher keeps
//! `QubeClient`/`Arc<dyn QoveryApi>` at its own integration seams, so unit
//! tests can swap in a hand-written fake instead of standing up a real
//! cluster.

pub mod crds;
pub mod kube_driver;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::blueprint::model::{Kustomization, Repository, Source};
use crate::errors::ReconciliationError;

pub use kube_driver::KubeReconciliationDriver;

#[async_trait]
pub trait ReconciliationDriver: Send + Sync {
    async fn create_namespace(&self, name: &str) -> Result<(), ReconciliationError>;

    async fn apply_git_repository(&self, name: &str, repository: &Repository) -> Result<(), ReconciliationError>;

    async fn apply_source_git_repository(&self, source: &Source) -> Result<(), ReconciliationError>;

    async fn apply_config_map(&self, name: &str, namespace: &str, data: &BTreeMap<String, String>) -> Result<(), ReconciliationError>;

    async fn apply_kustomization(&self, kustomization: &Kustomization) -> Result<(), ReconciliationError>;

    async fn delete_kustomization(&self, name: &str, namespace: &str) -> Result<(), ReconciliationError>;

    async fn check_git_repository_status(&self) -> Result<(), ReconciliationError>;

    async fn get_kustomization_status(&self, names: &[String]) -> Result<BTreeMap<String, bool>, ReconciliationError>;
}
