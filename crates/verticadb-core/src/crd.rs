//! VerticaDB custom resource.
//!
//! Only the parts of the resource that the restart and sandbox reconcilers
//! read or write are modelled here.

use crate::meta;
use crate::types::ObjectKey;
use crate::version::VersionInfo;
use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Condition types recorded in `status.conditions`
pub mod conditions {
    pub const DB_INITIALIZED: &str = "DBInitialized";
    pub const UPGRADE_IN_PROGRESS: &str = "UpgradeInProgress";
    pub const OFFLINE_UPGRADE_IN_PROGRESS: &str = "OfflineUpgradeInProgress";
    pub const AUTO_RESTART_VERTICA: &str = "AutoRestartVertica";
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "vertica.com",
    version = "v1",
    kind = "VerticaDB",
    plural = "verticadbs",
    shortname = "vdb",
    namespaced,
    status = "VerticaDbStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Subclusters", "type":"integer", "jsonPath":".status.subclusterCount"}"#,
    printcolumn = r#"{"name":"Up", "type":"integer", "jsonPath":".status.upNodeCount"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VerticaDbSpec {
    /// Server image for the main cluster
    pub image: String,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default)]
    pub init_policy: InitPolicy,
    #[serde(default)]
    pub communal: CommunalStorage,
    #[serde(default)]
    pub local: LocalStorage,
    /// Greater than zero selects an EON database
    #[serde(default)]
    pub shard_count: i32,
    #[serde(default = "default_true")]
    pub auto_restart_vertica: bool,
    /// Secret holding the superuser password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret: Option<String>,
    #[serde(default)]
    pub subclusters: Vec<Subcluster>,
    #[serde(default)]
    pub sandboxes: Vec<Sandbox>,
}

fn default_db_name() -> String {
    "vertdb".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum InitPolicy {
    #[default]
    Create,
    CreateSkipPackageInstall,
    Revive,
    ScheduleOnly,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommunalStorage {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub include_uid_in_path: bool,
    #[serde(default)]
    pub additional_config: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalStorage {
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
        }
    }
}

fn default_catalog_path() -> String {
    meta::DEFAULT_CATALOG_PATH.to_string()
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SubclusterType {
    #[default]
    Primary,
    Secondary,
    Transient,
    SandboxPrimary,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subcluster {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_: SubclusterType,
    pub size: i32,
    /// Desired shutdown state. For sandboxed subclusters this mirrors the
    /// sandbox's shutdown flag.
    #[serde(default)]
    pub shutdown: bool,
}

impl Subcluster {
    pub fn is_primary(&self) -> bool {
        matches!(
            self.type_,
            SubclusterType::Primary | SubclusterType::SandboxPrimary
        )
    }

    pub fn is_transient(&self) -> bool {
        self.type_ == SubclusterType::Transient
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Sandbox {
    pub name: String,
    /// Overrides `spec.image` for this sandbox
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub shutdown: bool,
    #[serde(default)]
    pub subclusters: Vec<SandboxSubcluster>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct SandboxSubcluster {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerticaDbStatus {
    #[serde(default)]
    pub subcluster_count: i32,
    #[serde(default)]
    pub added_to_db_count: i32,
    #[serde(default)]
    pub up_node_count: i32,
    #[serde(default)]
    pub subclusters: Vec<SubclusterStatus>,
    #[serde(default)]
    pub sandboxes: Vec<SandboxStatus>,
    #[serde(default)]
    pub conditions: Vec<VerticaDbCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubclusterStatus {
    pub name: String,
    #[serde(default)]
    pub oid: String,
    #[serde(default)]
    pub shutdown: bool,
    #[serde(default)]
    pub added_to_db_count: i32,
    #[serde(default)]
    pub up_node_count: i32,
    #[serde(default)]
    pub detail: Vec<PodStatusDetail>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodStatusDetail {
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub added_to_db: bool,
    #[serde(default)]
    pub vnode_name: String,
    #[serde(default)]
    pub up_node: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SandboxStatus {
    pub name: String,
    #[serde(default)]
    pub subclusters: Vec<String>,
    #[serde(default)]
    pub shutdown: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerticaDbCondition {
    #[serde(rename = "type")]
    pub type_: String,
    /// "True" or "False"
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl VerticaDB {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    pub fn is_eon(&self) -> bool {
        self.spec.shard_count > 0
    }

    pub fn use_vclusterops(&self) -> bool {
        meta::use_vclusterops(self.annotations())
    }

    pub fn is_k_safety_0(&self) -> bool {
        meta::is_k_safety_0(self.annotations())
    }

    /// Communal path, suffixed with the object uid when requested
    pub fn communal_path(&self) -> String {
        match (self.spec.communal.include_uid_in_path, self.uid()) {
            (true, Some(uid)) => format!("{}/{}", self.spec.communal.path, uid),
            _ => self.spec.communal.path.clone(),
        }
    }

    /// Server version from the version annotation, if parseable
    pub fn version_info(&self) -> Option<VersionInfo> {
        self.annotations()
            .get(meta::VERSION_ANNOTATION)
            .and_then(|v| VersionInfo::parse(v).ok())
    }

    pub fn find_subcluster(&self, name: &str) -> Option<&Subcluster> {
        self.spec.subclusters.iter().find(|sc| sc.name == name)
    }

    pub fn find_sandbox(&self, name: &str) -> Option<&Sandbox> {
        self.spec.sandboxes.iter().find(|sb| sb.name == name)
    }

    pub fn find_sandbox_status(&self, name: &str) -> Option<&SandboxStatus> {
        self.status
            .as_ref()
            .and_then(|s| s.sandboxes.iter().find(|sb| sb.name == name))
    }

    pub fn find_subcluster_status(&self, name: &str) -> Option<&SubclusterStatus> {
        self.status
            .as_ref()
            .and_then(|s| s.subclusters.iter().find(|sc| sc.name == name))
    }

    /// Subcluster name to sandbox name, from spec
    pub fn subcluster_sandbox_map(&self) -> HashMap<String, String> {
        self.spec
            .sandboxes
            .iter()
            .flat_map(|sb| {
                sb.subclusters
                    .iter()
                    .map(move |sc| (sc.name.clone(), sb.name.clone()))
            })
            .collect()
    }

    /// Subcluster name to sandbox name, from status
    pub fn subcluster_sandbox_status_map(&self) -> HashMap<String, String> {
        self.status
            .iter()
            .flat_map(|s| s.sandboxes.iter())
            .flat_map(|sb| sb.subclusters.iter().map(move |sc| (sc.clone(), sb.name.clone())))
            .collect()
    }

    /// Subclusters reconciled as part of `sandbox`. The main cluster is
    /// every subcluster not listed in any spec sandbox.
    pub fn subclusters_in_scope(&self, sandbox: &str) -> Vec<&Subcluster> {
        let sc_map = self.subcluster_sandbox_map();
        self.spec
            .subclusters
            .iter()
            .filter(|sc| {
                sc_map.get(&sc.name).map(String::as_str).unwrap_or(meta::MAIN_CLUSTER) == sandbox
            })
            .collect()
    }

    /// Effective shutdown for a subcluster. Sandboxed subclusters follow
    /// their sandbox.
    pub fn is_subcluster_shutdown(&self, sc: &Subcluster) -> bool {
        match self.subcluster_sandbox_map().get(&sc.name) {
            Some(sb_name) => self.find_sandbox(sb_name).is_some_and(|sb| sb.shutdown),
            None => sc.shutdown,
        }
    }

    /// Whether the last recorded status still has the subcluster shut down
    pub fn is_subcluster_status_shutdown(&self, name: &str) -> bool {
        self.status
            .iter()
            .flat_map(|s| s.subclusters.iter())
            .any(|s| s.name == name && s.shutdown)
    }

    /// Replica count the subcluster's StatefulSet should have. Zero while
    /// either the spec or the recorded status has it shut down.
    pub fn desired_replicas(&self, sc: &Subcluster) -> i32 {
        if self.is_subcluster_shutdown(sc) || self.is_subcluster_status_shutdown(&sc.name) {
            0
        } else {
            sc.size
        }
    }

    /// Image the given cluster should run
    pub fn target_image(&self, sandbox: &str) -> &str {
        self.find_sandbox(sandbox)
            .and_then(|sb| sb.image.as_deref())
            .filter(|img| !img.is_empty())
            .unwrap_or(&self.spec.image)
    }

    pub fn is_condition_true(&self, type_: &str) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.conditions
                .iter()
                .any(|c| c.type_ == type_ && c.status == "True")
        })
    }

    pub fn is_db_initialized(&self) -> bool {
        self.is_condition_true(conditions::DB_INITIALIZED)
    }
}

impl VerticaDbSpec {
    /// Change sandbox-primary subclusters named in `names` back to secondary.
    /// Returns true if anything changed.
    pub fn demote_sandbox_primaries(&mut self, names: &[String]) -> bool {
        let mut changed = false;
        for sc in self.subclusters.iter_mut() {
            if sc.type_ == SubclusterType::SandboxPrimary && names.contains(&sc.name) {
                sc.type_ = SubclusterType::Secondary;
                changed = true;
            }
        }
        changed
    }
}

impl VerticaDbStatus {
    /// Set a condition, returning true if the stored state changed
    pub fn set_condition(&mut self, type_: &str, status: bool, reason: &str) -> bool {
        let status_str = if status { "True" } else { "False" };
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(c) if c.status == status_str => false,
            Some(c) => {
                c.status = status_str.to_string();
                c.reason = Some(reason.to_string());
                c.last_transition_time = Some(Utc::now());
                true
            }
            None => {
                self.conditions.push(VerticaDbCondition {
                    type_: type_.to_string(),
                    status: status_str.to_string(),
                    reason: Some(reason.to_string()),
                    last_transition_time: Some(Utc::now()),
                });
                true
            }
        }
    }

    /// Remove subclusters from a sandbox's status entry and prune the entry
    /// once it is empty. Returns true if anything changed.
    pub fn remove_subclusters_from_sandbox(&mut self, sandbox: &str, names: &[String]) -> bool {
        let Some(idx) = self.sandboxes.iter().position(|sb| sb.name == sandbox) else {
            return false;
        };
        let before = self.sandboxes[idx].subclusters.len();
        self.sandboxes[idx]
            .subclusters
            .retain(|sc| !names.contains(sc));
        let changed = before != self.sandboxes[idx].subclusters.len();
        if self.sandboxes[idx].subclusters.is_empty() {
            self.sandboxes.remove(idx);
            return true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_vdb() -> VerticaDB {
        let mut vdb = VerticaDB::new(
            "vertdb",
            VerticaDbSpec {
                image: "vertica:24.3.0".to_string(),
                db_name: "vertdb".to_string(),
                init_policy: InitPolicy::Create,
                communal: CommunalStorage::default(),
                local: LocalStorage::default(),
                shard_count: 6,
                auto_restart_vertica: true,
                password_secret: None,
                subclusters: vec![
                    Subcluster {
                        name: "main".to_string(),
                        type_: SubclusterType::Primary,
                        size: 3,
                        shutdown: false,
                    },
                    Subcluster {
                        name: "sc1".to_string(),
                        type_: SubclusterType::SandboxPrimary,
                        size: 3,
                        shutdown: false,
                    },
                ],
                sandboxes: vec![Sandbox {
                    name: "sand".to_string(),
                    image: None,
                    shutdown: true,
                    subclusters: vec![SandboxSubcluster {
                        name: "sc1".to_string(),
                    }],
                }],
            },
        );
        vdb.metadata.namespace = Some("default".to_string());
        vdb
    }

    #[test]
    fn test_scope_partitions_subclusters() {
        let vdb = make_test_vdb();
        let main: Vec<_> = vdb.subclusters_in_scope("").iter().map(|s| s.name.clone()).collect();
        let sand: Vec<_> = vdb
            .subclusters_in_scope("sand")
            .iter()
            .map(|s| s.name.clone())
            .collect();
        assert_eq!(main, vec!["main"]);
        assert_eq!(sand, vec!["sc1"]);
    }

    #[test]
    fn test_sandboxed_subcluster_follows_sandbox_shutdown() {
        let vdb = make_test_vdb();
        let sc1 = vdb.find_subcluster("sc1").unwrap();
        let main = vdb.find_subcluster("main").unwrap();
        assert!(vdb.is_subcluster_shutdown(sc1));
        assert_eq!(vdb.desired_replicas(sc1), 0);
        assert_eq!(vdb.desired_replicas(main), 3);
    }

    #[test]
    fn test_desired_replicas_honours_status_shutdown() {
        let mut vdb = make_test_vdb();
        vdb.status = Some(VerticaDbStatus {
            subclusters: vec![SubclusterStatus {
                name: "main".to_string(),
                shutdown: true,
                ..Default::default()
            }],
            ..Default::default()
        });
        let main = vdb.find_subcluster("main").unwrap();
        assert!(!vdb.is_subcluster_shutdown(main));
        assert!(vdb.is_subcluster_status_shutdown("main"));
        assert_eq!(vdb.desired_replicas(main), 0);
    }

    #[test]
    fn test_remove_subclusters_prunes_empty_sandbox() {
        let mut status = VerticaDbStatus {
            sandboxes: vec![SandboxStatus {
                name: "sand".to_string(),
                subclusters: vec!["sc1".to_string(), "sc2".to_string()],
                shutdown: false,
            }],
            ..Default::default()
        };
        assert!(status.remove_subclusters_from_sandbox("sand", &["sc1".to_string()]));
        assert_eq!(status.sandboxes[0].subclusters, vec!["sc2"]);
        assert!(!status.remove_subclusters_from_sandbox("sand", &["sc1".to_string()]));
        assert!(status.remove_subclusters_from_sandbox("sand", &["sc2".to_string()]));
        assert!(status.sandboxes.is_empty());
    }

    #[test]
    fn test_set_condition_reports_change() {
        let mut status = VerticaDbStatus::default();
        assert!(status.set_condition(conditions::DB_INITIALIZED, true, "Created"));
        assert!(!status.set_condition(conditions::DB_INITIALIZED, true, "Created"));
        assert!(status.set_condition(conditions::DB_INITIALIZED, false, "Lost"));
    }

    #[test]
    fn test_demote_and_target_image() {
        let mut vdb = make_test_vdb();
        assert_eq!(vdb.target_image("sand"), "vertica:24.3.0");
        vdb.spec.sandboxes[0].image = Some("vertica:24.4.0".to_string());
        assert_eq!(vdb.target_image("sand"), "vertica:24.4.0");
        assert!(vdb.spec.demote_sandbox_primaries(&["sc1".to_string()]));
        assert_eq!(
            vdb.find_subcluster("sc1").unwrap().type_,
            SubclusterType::Secondary
        );
    }

    #[test]
    fn test_subcluster_type_wire_names() {
        let json = serde_json::to_string(&SubclusterType::SandboxPrimary).unwrap();
        assert_eq!(json, "\"sandboxprimary\"");
    }
}
