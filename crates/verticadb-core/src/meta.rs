//! Well-known annotations, labels, container names and paths.

use std::collections::BTreeMap;

/// Name this operator reports as in managed-by labels and events
pub const OPERATOR_NAME: &str = "verticadb-operator";
/// Operator version stamped onto pods
pub const CUR_OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

// --- Annotations ---

/// Selects the vclusterops (RPC) deployment mode. Defaults to true.
pub const VCLUSTER_OPS_ANNOTATION: &str = "vertica.com/vcluster-ops";
/// "0" selects k-safety 0
pub const KSAFETY_ANNOTATION: &str = "vertica.com/k-safety";
/// Server version detected from the running image
pub const VERSION_ANNOTATION: &str = "vertica.com/version";
/// Opaque token on the sandbox ConfigMap requesting an unsandbox
pub const UNSANDBOX_TRIGGER_ID_ANNOTATION: &str = "vertica.com/unsandbox-trigger-id";
/// "up/added" node counts kept on the VerticaDB
pub const READY_STATUS_ANNOTATION: &str = "vertica.com/ready-status";
/// Mirrors sandbox shutdown onto member subclusters
pub const SHUTDOWN_DRIVEN_BY_SANDBOX_ANNOTATION: &str = "vertica.com/shutdown-driven-by-sandbox";

pub const KUBERNETES_VERSION_ANNOTATION: &str = "kubernetes.io/version";
pub const KUBERNETES_GIT_COMMIT_ANNOTATION: &str = "kubernetes.io/git-commit";
pub const KUBERNETES_BUILD_DATE_ANNOTATION: &str = "kubernetes.io/buildDate";

// --- Labels ---

pub const SUBCLUSTER_NAME_LABEL: &str = "vertica.com/subcluster-name";
pub const SUBCLUSTER_TYPE_LABEL: &str = "vertica.com/subcluster-type";
pub const SANDBOX_NAME_LABEL: &str = "vertica.com/sandbox";
pub const DATABASE_LABEL: &str = "vertica.com/database";
pub const WATCHED_BY_SANDBOX_LABEL: &str = "vertica.com/watched-by-sandbox-controller";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const OPERATOR_VERSION_LABEL: &str = "app.kubernetes.io/version";
pub const COMPONENT_DATABASE: &str = "database";

// --- Sandbox ConfigMap data keys ---

pub const VERTICADB_NAME_KEY: &str = "verticaDBName";
pub const SANDBOX_NAME_KEY: &str = "sandboxName";

/// Name of the main cluster when used as a sandbox name
pub const MAIN_CLUSTER: &str = "";

// --- Containers and paths ---

pub const SERVER_CONTAINER: &str = "server";
pub const NMA_CONTAINER: &str = "nma";
/// Marker file the container entrypoint uses to auto-start the server
pub const STARTUP_CONF_FILE: &str = "/opt/vertica/config/startup.json";
pub const EULA_ACCEPTANCE_FILE: &str = "/opt/vertica/config/d5415f948449e9d4c421b568f2411140.dat";
pub const INSTALL_INDICATOR_FILE: &str = "/opt/vertica/config/admintools.conf";
pub const STARTUP_LOG_FILE: &str = "/opt/vertica/log/startup.log";
pub const DEFAULT_CATALOG_PATH: &str = "/data";
pub const CATALOG_PATH_ENV: &str = "CATALOG_PATH";

// --- Versions ---

pub const SANDBOX_SUPPORTED_MIN_VERSION: &str = "v24.3.0";
pub const NMA_IN_SIDECAR_MIN_VERSION: &str = "v24.2.0";

/// True when the vclusterops deployment mode is selected
pub fn use_vclusterops(annotations: &BTreeMap<String, String>) -> bool {
    lookup_bool(annotations, VCLUSTER_OPS_ANNOTATION, true)
}

/// True when the database runs with k-safety 0
pub fn is_k_safety_0(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .get(KSAFETY_ANNOTATION)
        .is_some_and(|v| v.trim() == "0")
}

/// Unsandbox trigger token, if one is set
pub fn unsandbox_trigger_id(annotations: &BTreeMap<String, String>) -> Option<&str> {
    annotations
        .get(UNSANDBOX_TRIGGER_ID_ANNOTATION)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Labels every sandbox ConfigMap carries
pub fn sandbox_config_map_labels(vdb_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string()),
        (COMPONENT_LABEL.to_string(), COMPONENT_DATABASE.to_string()),
        (DATABASE_LABEL.to_string(), vdb_name.to_string()),
        (INSTANCE_LABEL.to_string(), vdb_name.to_string()),
        (NAME_LABEL.to_string(), "vertica".to_string()),
        (WATCHED_BY_SANDBOX_LABEL.to_string(), "true".to_string()),
    ])
}

/// Label selector used to filter the sandbox ConfigMap watch
pub fn sandbox_config_map_selector() -> String {
    format!(
        "{}={},{}={},{}=true",
        MANAGED_BY_LABEL, OPERATOR_NAME, COMPONENT_LABEL, COMPONENT_DATABASE, WATCHED_BY_SANDBOX_LABEL
    )
}

fn lookup_bool(annotations: &BTreeMap<String, String>, key: &str, default: bool) -> bool {
    match annotations.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "true" || v == "1" => true,
        Some(v) if v == "false" || v == "0" => false,
        _ => default,
    }
}
