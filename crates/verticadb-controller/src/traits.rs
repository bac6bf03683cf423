use crate::error::Result;
use crate::types::*;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use std::collections::{BTreeMap, HashMap};
use verticadb_core::{ObjectKey, Outcome, VerticaDB};

/// Trait for Kubernetes object access
///
/// Updates carry the caller's resourceVersion and fail with
/// `ControllerError::Conflict` when it is stale. Reads of missing objects
/// fail with `ControllerError::NotFound`.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    // --- VerticaDB ---

    async fn get_vdb(&self, key: &ObjectKey) -> Result<VerticaDB>;

    /// Replace metadata and spec
    async fn update_vdb(&self, vdb: &VerticaDB) -> Result<VerticaDB>;

    /// Replace the status subresource
    async fn update_vdb_status(&self, vdb: &VerticaDB) -> Result<VerticaDB>;

    // --- ConfigMap ---

    async fn get_config_map(&self, key: &ObjectKey) -> Result<ConfigMap>;

    /// Delete a ConfigMap. Deleting a missing object succeeds.
    async fn delete_config_map(&self, key: &ObjectKey) -> Result<()>;

    /// Merge-patch annotations. A `None` value removes the key.
    async fn patch_config_map_annotations(
        &self,
        key: &ObjectKey,
        annotations: &BTreeMap<String, Option<String>>,
    ) -> Result<ConfigMap>;

    // --- Workloads ---

    async fn get_statefulset(&self, key: &ObjectKey) -> Result<StatefulSet>;

    async fn update_statefulset(&self, sts: &StatefulSet) -> Result<StatefulSet>;

    async fn get_pod(&self, key: &ObjectKey) -> Result<Pod>;

    async fn update_pod(&self, pod: &Pod) -> Result<Pod>;

    /// Delete a pod. Deleting a missing pod succeeds.
    async fn delete_pod(&self, key: &ObjectKey) -> Result<()>;

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret>;

    // --- Cluster ---

    async fn server_version(&self) -> Result<ServerVersion>;
}

/// Trait for running commands inside pod containers
#[async_trait]
pub trait PodRunner: Send + Sync {
    /// Run `command` in `container` of `pod` and capture its output. A
    /// non-zero exit is reported as `ControllerError::Exec`.
    async fn exec_in_pod(
        &self,
        pod: &ObjectKey,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput>;
}

/// Trait for administrative commands against a running database
///
/// Mutating verbs return an `Outcome` so that a requested requeue is
/// distinguishable from a hard error.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    // --- Node lifecycle ---

    /// Restart individual nodes through a live initiator
    async fn restart_node(
        &self,
        db: &DatabaseTarget,
        initiator_ip: &str,
        hosts: &[(String, String)],
    ) -> Result<Outcome>;

    /// Update catalog addresses for nodes whose pods moved
    async fn re_ip(
        &self,
        db: &DatabaseTarget,
        initiator_ip: &str,
        hosts: &[ReIpHost],
        communal: Option<&CommunalParams>,
    ) -> Result<Outcome>;

    /// Start a fully stopped cluster (or sandbox)
    async fn start_db(
        &self,
        db: &DatabaseTarget,
        initiator_ip: &str,
        host_ips: &[String],
        communal: Option<&CommunalParams>,
        sandbox: &str,
    ) -> Result<Outcome>;

    /// Stop the database, or only the named sandbox
    async fn stop_db(&self, db: &DatabaseTarget, initiator_ip: &str, sandbox: &str)
        -> Result<Outcome>;

    // --- Queries ---

    /// Node state keyed by vnode name
    async fn fetch_node_state(
        &self,
        db: &DatabaseTarget,
        initiator_ip: &str,
        host_ips: &[String],
    ) -> Result<HashMap<String, NodeState>>;

    async fn fetch_node_details(
        &self,
        db: &DatabaseTarget,
        host_ip: &str,
        vnode: &str,
    ) -> Result<NodeDetails>;

    // --- Sandboxes ---

    async fn unsandbox_subcluster(
        &self,
        db: &DatabaseTarget,
        request: &UnsandboxRequest,
    ) -> Result<Outcome>;
}
