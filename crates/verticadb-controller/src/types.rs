use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use verticadb_core::{ObjectKey, VerticaDB};

/// Captured output of a command run inside a pod
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Kubernetes server version as reported by `/version`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerVersion {
    pub git_version: String,
    pub git_commit: String,
    pub build_date: String,
}

/// Identity of the database a dispatcher call acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub vdb: ObjectKey,
    /// VerticaDB uid, used as the cache key
    pub uid: String,
    pub db_name: String,
    pub password_secret: Option<String>,
    pub catalog_path: String,
}

impl DatabaseTarget {
    pub fn from_vdb(vdb: &VerticaDB) -> Self {
        Self {
            vdb: vdb.key(),
            uid: vdb.uid().unwrap_or_default(),
            db_name: vdb.spec.db_name.clone(),
            password_secret: vdb.spec.password_secret.clone(),
            catalog_path: vdb.spec.local.catalog_path.clone(),
        }
    }
}

/// Communal storage parameters passed to re-ip and start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunalParams {
    pub path: String,
    pub endpoint: String,
    pub configuration_parameters: BTreeMap<String, String>,
}

impl CommunalParams {
    /// Parameters for the VerticaDB, or None when no communal path is set
    pub fn from_vdb(vdb: &VerticaDB) -> Option<Self> {
        if vdb.spec.communal.path.is_empty() {
            return None;
        }
        Some(Self {
            path: vdb.communal_path(),
            endpoint: vdb.spec.communal.endpoint.clone(),
            configuration_parameters: vdb.spec.communal.additional_config.clone(),
        })
    }
}

/// Host entry for a re-ip request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReIpHost {
    pub vnode: String,
    pub compat21_node: String,
    pub ip: String,
}

/// Node state as the database cluster reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeState {
    Up,
    Down,
    #[serde(other)]
    Unknown,
}

/// Catalog details for one up node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub sandbox: String,
    #[serde(default)]
    pub subcluster_oid: String,
}

/// Arguments for moving one subcluster out of a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsandboxRequest {
    /// Up primary in the main cluster
    pub initiator_ip: String,
    /// Up pod inside the sandbox, when one exists
    pub sandbox_initiator_ip: Option<String>,
    pub subcluster: String,
    pub sandbox: String,
    /// Node name to current pod address, used to correct stale catalog entries
    pub node_address_map: BTreeMap<String, String>,
}
