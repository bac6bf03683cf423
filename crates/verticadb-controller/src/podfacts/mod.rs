//! Point-in-time snapshot of per-pod database state.
//!
//! `PodFacts` is collected once per reconcile pass and read by every actor
//! in the chain. Any actor that changes the cluster (restart, re-ip,
//! unsandbox) must `invalidate()` it so the next reader collects again.
//! Query methods never do I/O.

mod gather;

pub use gather::{gather_script, GatherState, GATHER_MARKER};

use crate::context::OperatorContext;
use crate::error::{ControllerError, Result};
use crate::types::DatabaseTarget;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Container, Pod};
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use verticadb_core::{meta, names, ObjectKey, Subcluster, VerticaDB};

/// Observed state of one database pod
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodFact {
    pub name: ObjectKey,
    pub pod_ip: String,
    /// `hostname.subdomain.namespace`
    pub dns_name: String,
    pub vnode_name: String,
    /// Legacy node identifier, admintools deployments only
    pub compat21_node_name: String,
    pub subcluster_name: String,
    pub subcluster_oid: String,
    /// Sandbox the node belongs to. Empty for the main cluster.
    pub sandbox: String,
    pub image: String,
    pub pod_index: i32,
    /// Container used for exec
    pub exec_container: String,
    pub exists: bool,
    pub is_pod_running: bool,
    pub is_terminating: bool,
    pub is_installed: bool,
    pub is_primary: bool,
    pub is_transient: bool,
    /// Index is beyond the subcluster's size and the pod will be removed
    pub is_pending_delete: bool,
    /// Index is below the StatefulSet's replica count
    pub managed_by_parent: bool,
    pub up_node: bool,
    pub read_only: bool,
    pub startup_in_progress: bool,
    pub db_exists: bool,
    /// Pod must stay down
    pub shutdown: bool,
    pub eula_accepted: bool,
    pub has_dc_table_annotations: bool,
    pub has_nma_sidecar: bool,
    pub is_nma_container_ready: bool,
}

/// Filter applied to pods considered for re-ip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbCheck {
    OnlyWithDbs,
    OnlyWithoutDbs,
    Any,
}

/// Snapshot of all pods in one cluster scope (the main cluster or a sandbox)
pub struct PodFacts {
    ctx: Arc<OperatorContext>,
    sandbox: String,
    need_collection: bool,
    vdb_resource_version: Option<String>,
    detail: BTreeMap<ObjectKey, PodFact>,
}

impl PodFacts {
    pub fn new(ctx: Arc<OperatorContext>, sandbox: impl Into<String>) -> Self {
        Self {
            ctx,
            sandbox: sandbox.into(),
            need_collection: true,
            vdb_resource_version: None,
            detail: BTreeMap::new(),
        }
    }

    /// Empty snapshot bound to another scope, sharing the same handles
    pub fn copy(&self, sandbox: &str) -> Self {
        Self::new(self.ctx.clone(), sandbox)
    }

    pub fn sandbox(&self) -> &str {
        &self.sandbox
    }

    pub fn invalidate(&mut self) {
        self.need_collection = true;
    }

    pub fn needs_collection(&self) -> bool {
        self.need_collection
    }

    /// resourceVersion of the VerticaDB at the last collection
    pub fn vdb_resource_version(&self) -> Option<&str> {
        self.vdb_resource_version.as_deref()
    }

    /// Gather facts for every pod in scope. A no-op when the snapshot is
    /// still valid.
    pub async fn collect(&mut self, vdb: &VerticaDB) -> Result<()> {
        if !self.need_collection {
            return Ok(());
        }
        self.vdb_resource_version = vdb.metadata.resource_version.clone();
        self.detail.clear();

        let sandbox = self.sandbox.clone();
        for sc in vdb.subclusters_in_scope(&sandbox) {
            self.collect_subcluster(vdb, sc).await?;
        }
        self.need_collection = false;
        debug!(
            "Collected {} pod facts for {} (sandbox '{}')",
            self.detail.len(),
            vdb.key(),
            self.sandbox
        );
        Ok(())
    }

    async fn collect_subcluster(&mut self, vdb: &VerticaDB, sc: &Subcluster) -> Result<()> {
        let sts_key = names::sts_name(vdb, sc);
        let sts = match self.ctx.client.get_statefulset(&sts_key).await {
            Ok(sts) => sts,
            Err(e) if e.is_not_found() => {
                debug!("StatefulSet {} not found, skipping subcluster {}", sts_key, sc.name);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
        for index in 0..sc.size.max(replicas) {
            let pf = self.collect_pod(vdb, sc, &sts, replicas, index).await?;
            debug!("pod fact {}: {:?}", pf.name, pf);
            self.detail.insert(pf.name.clone(), pf);
        }
        Ok(())
    }

    async fn collect_pod(
        &self,
        vdb: &VerticaDB,
        sc: &Subcluster,
        sts: &StatefulSet,
        replicas: i32,
        index: i32,
    ) -> Result<PodFact> {
        let vclusterops = vdb.use_vclusterops();
        let mut pf = PodFact {
            name: names::pod_name(vdb, sc, index),
            subcluster_name: sc.name.clone(),
            is_primary: sc.is_primary(),
            is_transient: sc.is_transient(),
            pod_index: index,
            exec_container: exec_container_for(sts).to_string(),
            shutdown: vdb.is_subcluster_shutdown(sc),
            managed_by_parent: index < replicas,
            ..Default::default()
        };

        let mut catalog_path = vdb.spec.local.catalog_path.clone();
        match self.ctx.client.get_pod(&pf.name).await {
            Ok(pod) => {
                apply_pod(&mut pf, &pod, sc);
                pf.sandbox = sts.labels().get(meta::SANDBOX_NAME_LABEL).cloned().unwrap_or_default();
                if let Some(path) = server_container(&pod).and_then(|c| env_value(c, meta::CATALOG_PATH_ENV)) {
                    catalog_path = path;
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let gs = if pf.is_pod_running {
            self.run_gather(vdb, &pf, &catalog_path).await?
        } else {
            GatherState::default()
        };

        // Install state
        if vclusterops {
            pf.is_installed = true;
        } else {
            pf.is_installed = status_detail(vdb, sc, index).is_some_and(|d| d.installed);
            if pf.is_pod_running {
                pf.is_installed = gs.install_indicator_exists;
                if pf.is_installed {
                    pf.compat21_node_name = gs.compat21_node_name.clone();
                }
            }
        }

        // Database membership. Status wins over disk when the pod is down;
        // the catalog may have been removed, e.g. by an unsandbox.
        if let Some(scs) = vdb.find_subcluster_status(&sc.name) {
            pf.db_exists = scs.added_to_db_count > index;
            if let Some(d) = scs.detail.get(index as usize) {
                pf.vnode_name = d.vnode_name.clone();
                pf.db_exists = d.added_to_db;
            }
        }
        if pf.is_pod_running {
            pf.db_exists = gs.db_exists || pf.db_exists;
            if !gs.vnode_name.is_empty() {
                pf.vnode_name = gs.vnode_name.clone();
            }
            pf.eula_accepted = gs.eula_accepted;
            pf.up_node = if vclusterops {
                gs.up_node
            } else {
                pf.db_exists && gs.vertica_pid_running
            };
        }

        if pf.is_pod_running && pf.up_node {
            let db = DatabaseTarget::from_vdb(vdb);
            match self
                .ctx
                .dispatcher
                .fetch_node_details(&db, &pf.pod_ip, &pf.vnode_name)
                .await
            {
                Ok(details) => {
                    pf.read_only = details.read_only;
                    pf.sandbox = details.sandbox;
                    pf.subcluster_oid = details.subcluster_oid;
                }
                Err(e) => info!("Could not fetch node details for {}: {}", pf.name, e),
            }
        }

        pf.startup_in_progress = pf.db_exists
            && pf.is_pod_running
            && !pf.up_node
            && gs.vertica_pid_running
            && !gs.startup_complete;
        Ok(pf)
    }

    async fn run_gather(&self, vdb: &VerticaDB, pf: &PodFact, catalog_path: &str) -> Result<GatherState> {
        let cmd = vec![
            "bash".to_string(),
            "-c".to_string(),
            gather_script(vdb, pf, catalog_path),
        ];
        let out = self
            .ctx
            .runner
            .exec_in_pod(&pf.name, &pf.exec_container, &cmd)
            .await?;
        GatherState::parse(&out.stdout).map_err(ControllerError::from)
    }

    /// Delete the startup marker in every pod of a subcluster so the
    /// container entrypoint does not restart the server process
    pub async fn remove_startup_file_in_subcluster_pods(&self, subcluster: &str) -> Result<()> {
        let cmd = vec![
            "bash".to_string(),
            "-c".to_string(),
            format!("rm -rf {}", meta::STARTUP_CONF_FILE),
        ];
        for name in self.find_pod_names_in_subcluster(subcluster) {
            self.ctx
                .runner
                .exec_in_pod(&name, meta::SERVER_CONTAINER, &cmd)
                .await?;
            info!("Removed startup.json in pod {} (subcluster {})", name, subcluster);
        }
        Ok(())
    }

    // --- Access ---

    pub fn get(&self, name: &ObjectKey) -> Option<&PodFact> {
        self.detail.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PodFact> {
        self.detail.values()
    }

    pub fn len(&self) -> usize {
        self.detail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detail.is_empty()
    }

    /// Record that a pod now carries the DC table annotations
    pub fn mark_dc_table_annotations(&mut self, name: &ObjectKey) {
        if let Some(pf) = self.detail.get_mut(name) {
            pf.has_dc_table_annotations = true;
        }
    }

    /// Replace the snapshot with the given facts
    #[cfg(test)]
    pub(crate) fn set_facts(&mut self, facts: Vec<PodFact>) {
        self.detail = facts.into_iter().map(|pf| (pf.name.clone(), pf)).collect();
        self.need_collection = false;
    }

    // --- Queries ---

    /// Pods matching `f`, ordered by vnode name
    fn filter_pods<F: Fn(&PodFact) -> bool>(&self, f: F) -> Vec<&PodFact> {
        let mut pods: Vec<&PodFact> = self.detail.values().filter(|pf| f(pf)).collect();
        pods.sort_by(|a, b| a.vnode_name.cmp(&b.vnode_name));
        pods
    }

    /// First pod matching `f`, ordered by DNS name
    fn find_first_pod_sorted<F: Fn(&PodFact) -> bool>(&self, f: F) -> Option<&PodFact> {
        self.filter_pods(f)
            .into_iter()
            .min_by(|a, b| a.dns_name.cmp(&b.dns_name))
    }

    fn count_pods<F: Fn(&PodFact) -> bool>(&self, f: F) -> usize {
        self.detail.values().filter(|pf| f(pf)).count()
    }

    /// True if any primary has a catalog. Secondaries may not have pulled
    /// theirs down yet, so they are not trusted.
    pub fn does_db_exist(&self) -> bool {
        self.detail.values().any(|pf| pf.is_primary && pf.db_exists)
    }

    pub fn find_first_up_pod(&self, allow_read_only: bool, subcluster: Option<&str>) -> Option<&PodFact> {
        self.find_first_pod_sorted(|pf| {
            subcluster.is_none_or(|sc| pf.subcluster_name == sc)
                && pf.up_node
                && (allow_read_only || !pf.read_only)
        })
    }

    pub fn find_first_up_pod_ip(&self, allow_read_only: bool, subcluster: Option<&str>) -> Option<String> {
        self.find_first_up_pod(allow_read_only, subcluster)
            .map(|pf| pf.pod_ip.clone())
    }

    /// Up primary in the main cluster, used as an unsandbox initiator
    pub fn find_first_primary_up_pod_ip(&self) -> Option<String> {
        self.find_first_pod_sorted(|pf| pf.sandbox == meta::MAIN_CLUSTER && pf.is_primary && pf.up_node)
            .map(|pf| pf.pod_ip.clone())
    }

    /// Pod to run an admin command from, by preference: up and writable
    /// and staying, up and writable, up, installed and running
    pub fn find_pod_to_run_admin_cmd_any(&self) -> Option<&PodFact> {
        self.find_first_pod_sorted(|pf| pf.up_node && !pf.read_only && !pf.is_pending_delete)
            .or_else(|| self.find_first_pod_sorted(|pf| pf.up_node && !pf.read_only))
            .or_else(|| self.find_first_pod_sorted(|pf| pf.up_node))
            .or_else(|| self.find_first_pod_sorted(|pf| pf.is_installed && pf.is_pod_running))
    }

    /// Running, installed pod without a server process up
    pub fn find_pod_to_run_admin_cmd_offline(&self) -> Option<&PodFact> {
        self.find_first_pod_sorted(|pf| pf.is_installed && pf.is_pod_running && !pf.up_node)
    }

    /// Pods that need a restart.
    ///
    /// Read-only nodes count when `restart_read_only` is set, since they
    /// are read-only because quorum was lost. Pending-delete pods are only
    /// wanted by a full cluster start, where they may be needed for quorum.
    pub fn find_restartable_pods(
        &self,
        restart_read_only: bool,
        restart_transient: bool,
        restart_pending_delete: bool,
    ) -> Vec<&PodFact> {
        self.filter_pods(|pf| {
            if (!restart_transient && pf.is_transient) || pf.shutdown {
                return false;
            }
            (!pf.up_node || (restart_read_only && pf.read_only))
                && pf.db_exists
                && pf.is_pod_running
                && pf.has_dc_table_annotations
                && (restart_pending_delete || !pf.is_pending_delete)
        })
    }

    /// Pods whose catalog address may need refreshing
    pub fn find_re_ip_pods(&self, check: DbCheck) -> Vec<&PodFact> {
        self.filter_pods(|pf| {
            if !pf.exists || !pf.is_pod_running || !pf.is_installed {
                return false;
            }
            // The agent must be up before a re-ip
            if pf.has_nma_sidecar && !pf.is_nma_container_ready {
                return false;
            }
            match check {
                DbCheck::OnlyWithDbs => pf.db_exists,
                DbCheck::OnlyWithoutDbs => !pf.db_exists,
                DbCheck::Any => true,
            }
        })
    }

    /// Subclusters that the catalog reports in the main cluster while the
    /// given status map (subcluster to sandbox) still lists them in a
    /// sandbox. Keyed by sandbox.
    pub fn find_unsandboxed_subclusters_still_in_sandbox_status(
        &self,
        status_map: &HashMap<String, String>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut found: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut seen = HashSet::new();
        for pf in self.detail.values() {
            if !seen.insert(pf.subcluster_name.as_str()) {
                continue;
            }
            if let Some(sb) = status_map.get(&pf.subcluster_name) {
                if pf.sandbox == meta::MAIN_CLUSTER {
                    found
                        .entry(sb.clone())
                        .or_default()
                        .push(pf.subcluster_name.clone());
                }
            }
        }
        found
    }

    /// vnode name to pod IP for a subcluster
    pub fn find_node_name_and_address_in_subcluster(&self, subcluster: &str) -> BTreeMap<String, String> {
        self.detail
            .values()
            .filter(|pf| pf.subcluster_name == subcluster)
            .map(|pf| (pf.vnode_name.clone(), pf.pod_ip.clone()))
            .collect()
    }

    pub fn find_pod_names_in_subcluster(&self, subcluster: &str) -> Vec<ObjectKey> {
        self.detail
            .values()
            .filter(|pf| pf.subcluster_name == subcluster)
            .map(|pf| pf.name.clone())
            .collect()
    }

    /// True if every pod is running and none has an installation
    pub fn are_all_pods_running_and_zero_installed(&self) -> bool {
        self.detail
            .values()
            .all(|pf| !(((!pf.exists || !pf.is_pod_running) && pf.managed_by_parent) || pf.is_installed))
    }

    pub fn count_running_and_installed(&self) -> usize {
        self.count_pods(|pf| pf.is_pod_running && pf.is_installed)
    }

    /// Pods the restart logic must handle but cannot yet, because they are
    /// not running or lack the DC table annotations. Pods the StatefulSet
    /// does not manage yet are skipped.
    pub fn count_not_restartable_pods(&self, vclusterops: bool) -> usize {
        self.count_pods(|pf| {
            ((!vclusterops && pf.is_installed) || pf.db_exists)
                && pf.managed_by_parent
                && (!pf.is_pod_running || !pf.has_dc_table_annotations)
        })
    }

    pub fn count_up_primary_nodes(&self) -> usize {
        self.count_pods(|pf| pf.up_node && pf.is_primary)
    }

    pub fn get_up_node_and_not_read_only_count(&self) -> usize {
        self.count_pods(|pf| pf.up_node && !pf.read_only)
    }

    pub fn get_shutdown_count(&self) -> usize {
        self.count_pods(|pf| pf.shutdown)
    }

    /// True when more than half of the primaries are restartable
    pub fn quorum_check_for_restart_cluster(&self, restart_read_only: bool) -> bool {
        let restartable = self
            .find_restartable_pods(restart_read_only, false, true)
            .into_iter()
            .filter(|pf| pf.is_primary)
            .count();
        let primaries = self.count_pods(|pf| pf.is_primary);
        restartable > primaries / 2
    }

    /// True if quorum holds after `offset` more primaries go down
    pub fn does_db_have_quorum(&self, offset: usize) -> bool {
        let total = self.count_pods(|pf| pf.is_primary) as i64;
        let up = self.count_up_primary_nodes() as i64;
        2 * (up - offset as i64) > total
    }

    pub fn is_sandbox_empty(&self, sandbox: &str) -> bool {
        !self.detail.values().any(|pf| pf.sandbox == sandbox)
    }
}

/// nma when the StatefulSet runs the agent as a sidecar, else server
fn exec_container_for(sts: &StatefulSet) -> &'static str {
    let has_nma = sts
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .is_some_and(|ps| ps.containers.iter().any(|c| c.name == meta::NMA_CONTAINER));
    if has_nma {
        meta::NMA_CONTAINER
    } else {
        meta::SERVER_CONTAINER
    }
}

/// Server container, falling back to the first container
pub(crate) fn server_container(pod: &Pod) -> Option<&Container> {
    let containers = &pod.spec.as_ref()?.containers;
    containers
        .iter()
        .find(|c| c.name == meta::SERVER_CONTAINER)
        .or_else(|| containers.first())
}

fn env_value(container: &Container, name: &str) -> Option<String> {
    container
        .env
        .as_ref()?
        .iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value.clone())
}

fn status_detail<'a>(
    vdb: &'a VerticaDB,
    sc: &Subcluster,
    index: i32,
) -> Option<&'a verticadb_core::PodStatusDetail> {
    vdb.find_subcluster_status(&sc.name)
        .and_then(|scs| scs.detail.get(index as usize))
}

/// Fill in the facts read straight off the Pod object
fn apply_pod(pf: &mut PodFact, pod: &Pod, sc: &Subcluster) {
    pf.exists = true;
    pf.is_terminating = pod.metadata.deletion_timestamp.is_some();
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    // A terminating pod is seconds away from deletion, don't exec into it
    pf.is_pod_running = phase == Some("Running") && !pf.is_terminating;
    let spec = pod.spec.as_ref();
    let hostname = spec
        .and_then(|s| s.hostname.clone())
        .unwrap_or_else(|| pod.name_any());
    let subdomain = spec.and_then(|s| s.subdomain.clone()).unwrap_or_default();
    pf.dns_name = format!("{}.{}.{}", hostname, subdomain, pod.namespace().unwrap_or_default());
    pf.pod_ip = pod
        .status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .unwrap_or_default();
    pf.is_pending_delete = pf.pod_index >= sc.size;
    pf.image = server_container(pod)
        .and_then(|c| c.image.clone())
        .unwrap_or_default();
    // The annotations are always added together, checking one is enough
    pf.has_dc_table_annotations = pod
        .annotations()
        .contains_key(meta::KUBERNETES_VERSION_ANNOTATION);
    pf.has_nma_sidecar = spec.is_some_and(|s| s.containers.iter().any(|c| c.name == meta::NMA_CONTAINER));
    pf.is_nma_container_ready = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|cs| cs.iter().find(|c| c.name == meta::NMA_CONTAINER))
        .is_some_and(|c| c.ready);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_pod_fact, TestWorld};
    use crate::types::NodeDetails;
    use verticadb_core::{PodStatusDetail, SubclusterStatus};

    fn make_test_facts(world: &TestWorld, facts: Vec<PodFact>) -> PodFacts {
        let mut pfacts = PodFacts::new(world.ctx.clone(), "");
        pfacts.set_facts(facts);
        pfacts
    }

    #[test]
    fn test_restartable_pods_rules() {
        let world = TestWorld::new();
        let mut down = make_pod_fact("sc", 0);
        down.up_node = false;
        let mut ro = make_pod_fact("sc", 1);
        ro.read_only = true;
        let mut transient = make_pod_fact("sc", 2);
        transient.up_node = false;
        transient.is_transient = true;
        let mut pending = make_pod_fact("sc", 3);
        pending.up_node = false;
        pending.is_pending_delete = true;
        let mut shutdown = make_pod_fact("sc", 4);
        shutdown.up_node = false;
        shutdown.shutdown = true;
        let mut no_ann = make_pod_fact("sc", 5);
        no_ann.up_node = false;
        no_ann.has_dc_table_annotations = false;

        let pfacts = make_test_facts(&world, vec![down, ro, transient, pending, shutdown, no_ann]);
        let idx = |pods: Vec<&PodFact>| pods.iter().map(|p| p.pod_index).collect::<Vec<_>>();

        assert_eq!(idx(pfacts.find_restartable_pods(false, false, false)), vec![0]);
        assert_eq!(idx(pfacts.find_restartable_pods(true, false, false)), vec![0, 1]);
        assert_eq!(idx(pfacts.find_restartable_pods(true, true, true)), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_admin_cmd_pod_preference() {
        let world = TestWorld::new();
        let mut ro = make_pod_fact("sc", 0);
        ro.read_only = true;
        let mut pending = make_pod_fact("sc", 1);
        pending.is_pending_delete = true;
        let good = make_pod_fact("sc", 2);
        let pfacts = make_test_facts(&world, vec![ro.clone(), pending.clone(), good]);
        assert_eq!(pfacts.find_pod_to_run_admin_cmd_any().unwrap().pod_index, 2);

        let pfacts = make_test_facts(&world, vec![ro.clone(), pending]);
        assert_eq!(pfacts.find_pod_to_run_admin_cmd_any().unwrap().pod_index, 1);

        let mut down = make_pod_fact("sc", 3);
        down.up_node = false;
        let pfacts = make_test_facts(&world, vec![down.clone()]);
        assert_eq!(pfacts.find_pod_to_run_admin_cmd_any().unwrap().pod_index, 3);
        assert_eq!(pfacts.find_pod_to_run_admin_cmd_offline().unwrap().pod_index, 3);

        let pfacts = make_test_facts(&world, vec![ro]);
        assert!(pfacts.find_pod_to_run_admin_cmd_offline().is_none());
    }

    #[test]
    fn test_counts_and_quorum() {
        let world = TestWorld::new();
        let mut facts: Vec<PodFact> = (0..3).map(|i| make_pod_fact("main", i)).collect();
        facts[1].up_node = false;
        facts[2].up_node = false;
        let mut secondary = make_pod_fact("sec", 0);
        secondary.is_primary = false;
        facts.push(secondary);
        let pfacts = make_test_facts(&world, facts);

        assert_eq!(pfacts.count_up_primary_nodes(), 1);
        assert_eq!(pfacts.get_up_node_and_not_read_only_count(), 2);
        assert!(!pfacts.does_db_have_quorum(0));
        // Two of three primaries can be restarted
        assert!(pfacts.quorum_check_for_restart_cluster(true));
        assert!(pfacts.does_db_exist());
    }

    #[test]
    fn test_not_restartable_counts_managed_pods_only() {
        let world = TestWorld::new();
        let mut not_running = make_pod_fact("sc", 0);
        not_running.is_pod_running = false;
        let mut unmanaged = not_running.clone();
        unmanaged.name.name = "unmanaged".to_string();
        unmanaged.managed_by_parent = false;
        let mut no_db = not_running.clone();
        no_db.name.name = "nodb".to_string();
        no_db.db_exists = false;

        let pfacts = make_test_facts(&world, vec![not_running, unmanaged, no_db]);
        assert_eq!(pfacts.count_not_restartable_pods(true), 1);
        // Installed pods count for admintools deployments
        assert_eq!(pfacts.count_not_restartable_pods(false), 2);
    }

    #[test]
    fn test_unsandboxed_subclusters_still_in_status() {
        let world = TestWorld::new();
        let mut a = make_pod_fact("sc1", 0);
        a.sandbox = String::new();
        let mut b = make_pod_fact("sc2", 0);
        b.sandbox = "sand".to_string();
        let pfacts = make_test_facts(&world, vec![a, b]);
        let status_map = HashMap::from([
            ("sc1".to_string(), "sand".to_string()),
            ("sc2".to_string(), "sand".to_string()),
        ]);
        let found = pfacts.find_unsandboxed_subclusters_still_in_sandbox_status(&status_map);
        assert_eq!(found.get("sand"), Some(&vec!["sc1".to_string()]));
        assert!(!pfacts.is_sandbox_empty("sand"));
        assert!(pfacts.is_sandbox_empty("other"));
    }

    #[test]
    fn test_re_ip_pods_wait_for_nma() {
        let world = TestWorld::new();
        let mut waiting = make_pod_fact("sc", 0);
        waiting.has_nma_sidecar = true;
        waiting.is_nma_container_ready = false;
        let ready = make_pod_fact("sc", 1);
        let mut fresh = make_pod_fact("sc", 2);
        fresh.db_exists = false;
        let pfacts = make_test_facts(&world, vec![waiting, ready, fresh]);

        assert_eq!(pfacts.find_re_ip_pods(DbCheck::Any).len(), 2);
        assert_eq!(pfacts.find_re_ip_pods(DbCheck::OnlyWithDbs)[0].pod_index, 1);
        assert_eq!(pfacts.find_re_ip_pods(DbCheck::OnlyWithoutDbs)[0].pod_index, 2);
    }

    #[tokio::test]
    async fn test_collect_from_cluster() {
        let world = TestWorld::new();
        let mut vdb = crate::testing::make_test_vdb();
        vdb.status = Some(verticadb_core::VerticaDbStatus {
            subclusters: vec![SubclusterStatus {
                name: "main".to_string(),
                added_to_db_count: 3,
                detail: (1..=3)
                    .map(|i| PodStatusDetail {
                        installed: true,
                        added_to_db: true,
                        vnode_name: format!("v_vertdb_node{:04}", i),
                        up_node: false,
                    })
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        });
        world.add_vdb(vdb.clone()).await;
        world
            .add_pods(&vdb, "main", &[
                crate::testing::PodState::up(),
                crate::testing::PodState::down(),
                crate::testing::PodState::not_running(),
            ])
            .await;
        world
            .dispatcher
            .set_node_details(
                "v_vertdb_node0001",
                NodeDetails {
                    read_only: true,
                    sandbox: String::new(),
                    subcluster_oid: "4500".to_string(),
                },
            )
            .await;

        let mut pfacts = PodFacts::new(world.ctx.clone(), "");
        pfacts.collect(&vdb).await.unwrap();
        assert_eq!(pfacts.len(), 3);
        assert!(!pfacts.needs_collection());

        let pods: Vec<&PodFact> = pfacts.iter().collect();
        assert!(pods[0].up_node && pods[0].read_only);
        assert_eq!(pods[0].subcluster_oid, "4500");
        assert!(pods[0].has_dc_table_annotations);
        assert!(!pods[1].up_node && pods[1].db_exists && pods[1].is_pod_running);
        assert!(!pods[2].is_pod_running);
        // Down pod keeps the vnode recorded in status
        assert_eq!(pods[2].vnode_name, "v_vertdb_node0003");
        assert!(pods[2].db_exists);

        // A valid snapshot is not collected again
        let execs = world.runner.calls().await.len();
        pfacts.collect(&vdb).await.unwrap();
        assert_eq!(world.runner.calls().await.len(), execs);
        pfacts.invalidate();
        pfacts.collect(&vdb).await.unwrap();
        assert!(world.runner.calls().await.len() > execs);
    }

    #[tokio::test]
    async fn test_collect_skips_missing_statefulset() {
        let world = TestWorld::new();
        let vdb = crate::testing::make_test_vdb();
        world.add_vdb(vdb.clone()).await;
        let mut pfacts = PodFacts::new(world.ctx.clone(), "");
        pfacts.collect(&vdb).await.unwrap();
        assert!(pfacts.is_empty());
    }
}
