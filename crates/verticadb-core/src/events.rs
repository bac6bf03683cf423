//! Event reason strings.
//!
//! These appear in `kubectl get events` under the REASON column.

// Deployment checks
pub const VCLUSTER_OPS_DISABLED: &str = "VClusterOpsDisabled";
pub const UNSUPPORTED_VERTICA_VERSION: &str = "UnsupportedVerticaVersion";

// Restart
pub const CLUSTER_RESTART_STARTED: &str = "ClusterRestartStarted";
pub const CLUSTER_RESTART_SUCCEEDED: &str = "ClusterRestartSucceeded";
pub const CLUSTER_RESTART_FAILED: &str = "ClusterRestartFailed";
pub const NODE_RESTART_STARTED: &str = "NodeRestartStarted";
pub const NODE_RESTART_SUCCEEDED: &str = "NodeRestartSucceeded";
pub const NODE_RESTART_FAILED: &str = "NodeRestartFailed";
pub const REIP_FAILED: &str = "ReipFailed";
pub const QUORUM_LOST: &str = "QuorumLost";

// Unsandbox
pub const UNSANDBOX_SUBCLUSTER_START: &str = "UnsandboxSubclusterStart";
pub const UNSANDBOX_SUBCLUSTER_SUCCEEDED: &str = "UnsandboxSubclusterSucceeded";
pub const UNSANDBOX_SUBCLUSTER_FAILED: &str = "UnsandboxSubclusterFailed";

// Sandbox restart
pub const SANDBOX_RESTARTED: &str = "SandboxRestarted";

// Upgrade
pub const UPGRADE_START: &str = "UpgradeStart";
pub const UPGRADE_SUCCEEDED: &str = "UpgradeSucceeded";
pub const STOP_DB_FAILED: &str = "StopDBFailed";
