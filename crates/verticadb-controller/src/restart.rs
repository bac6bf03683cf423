//! Restart and re-ip of database nodes.
//!
//! Each pass picks one of two strategies. When no node is up and writable
//! the whole cluster is started from an offline initiator. Otherwise the
//! down nodes are restarted individually through a live node.

use crate::actor::{ReconcileActor, ReconcilePass};
use crate::context::OperatorContext;
use crate::error::Result;
use crate::events::EventPublisherExt;
use crate::podfacts::{server_container, DbCheck, PodFact};
use crate::types::{CommunalParams, DatabaseTarget, NodeState, ReIpHost};
use crate::update;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use verticadb_core::crd::conditions;
use verticadb_core::{events, meta, names, InitPolicy, Outcome};

/// Kills spread so the server process exits. PID 1 in the container has no
/// signal handler, so the server itself can't be signalled directly.
const KILL_SPREAD_SCRIPT: &str = concat!(
    "for pid in $(pgrep ^spread$); do echo \"Killing process $pid\"; kill -n SIGKILL $pid; done",
    " && rm -rf /opt/vertica/config/startup.json"
);

const KILLED_MARKER: &str = "Killing process";

pub struct RestartReconciler {
    ctx: Arc<OperatorContext>,
    /// Treat read-only nodes as down
    restart_read_only: bool,
}

impl RestartReconciler {
    pub fn new(ctx: Arc<OperatorContext>, restart_read_only: bool) -> Self {
        Self {
            ctx,
            restart_read_only,
        }
    }

    async fn set_auto_restart_condition(&self, pass: &mut ReconcilePass, value: bool) -> Result<()> {
        let mut status = pass.vdb.status.clone().unwrap_or_default();
        if !status.set_condition(conditions::AUTO_RESTART_VERTICA, value, "Detected") {
            return Ok(());
        }
        let (vdb, _) = update::update_vdb_status(&self.ctx, &pass.vdb.key(), |s| {
            s.set_condition(conditions::AUTO_RESTART_VERTICA, value, "Detected")
        })
        .await?;
        pass.vdb = vdb;
        Ok(())
    }

    /// Start every down node of a cluster that has no writable node up
    async fn reconcile_cluster(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        let vclusterops = pass.vdb.use_vclusterops();
        let pfacts = &pass.pfacts;

        if pfacts.are_all_pods_running_and_zero_installed() {
            debug!("No pod has an installation, nothing to restart");
            return Ok(Outcome::Continue);
        }
        if pfacts.count_running_and_installed() == 0 {
            info!("Waiting for pods with an installation to come online");
            return Ok(Outcome::Requeue);
        }
        if vclusterops && !pfacts.quorum_check_for_restart_cluster(self.restart_read_only) {
            info!("Waiting for enough primaries to be running to restore quorum");
            return Ok(Outcome::Requeue);
        }
        if pass.vdb.is_k_safety_0() && pfacts.count_not_restartable_pods(vclusterops) > 0 {
            info!("Waiting for all installed pods to be running, k-safety is 0");
            return Ok(Outcome::Requeue);
        }
        let Some(initiator) = pfacts.find_pod_to_run_admin_cmd_offline().cloned() else {
            info!("No offline pod found to run the cluster start from");
            return Ok(Outcome::Requeue);
        };

        // Transient pods only have their IPs known to the admintools path
        let down_pods: Vec<PodFact> = pfacts
            .find_restartable_pods(self.restart_read_only, !vclusterops, true)
            .into_iter()
            .cloned()
            .collect();

        if self.kill_old_processes(&down_pods).await? {
            return Ok(Outcome::Requeue);
        }
        let (down_pods, probe_wait) = self.filter_non_active_startup_probe(down_pods).await?;
        if probe_wait {
            return self.liveness_probe_wait(pass).await;
        }
        let (down_pods, slow) = filter_slow_startup(down_pods);
        if slow {
            return self.liveness_probe_wait(pass).await;
        }
        self.accept_eula(pass, &down_pods).await?;

        let reip_pods: Vec<PodFact> = self.re_ip_pods(pass, false).into_iter().cloned().collect();
        if vclusterops {
            // No partial re-ip over RPC; every down pod has to take part
            let missing = down_pods
                .iter()
                .find(|d| !reip_pods.iter().any(|r| r.name == d.name));
            if let Some(pod) = missing {
                info!("Pod {} is not ready for re-ip yet, requeueing", pod.name);
                return Ok(Outcome::Requeue);
            }
        }
        let outcome = self.re_ip(pass, &initiator, &reip_pods).await?;
        if outcome.aborts_chain() {
            return Ok(outcome);
        }

        if !pass.pfacts.does_db_exist() {
            debug!("No database exists yet, skipping cluster start");
            return Ok(Outcome::Continue);
        }
        self.start_cluster(pass, &initiator, &down_pods).await
    }

    async fn start_cluster(
        &self,
        pass: &mut ReconcilePass,
        initiator: &PodFact,
        down_pods: &[PodFact],
    ) -> Result<Outcome> {
        let hosts: Vec<String> = down_pods.iter().map(|pf| pf.pod_ip.clone()).collect();
        let sandbox = pass.pfacts.sandbox().to_string();
        let db = DatabaseTarget::from_vdb(&pass.vdb);
        let communal = CommunalParams::from_vdb(&pass.vdb);

        self.ctx
            .events
            .normal(
                &pass.vdb,
                events::CLUSTER_RESTART_STARTED,
                format!("Starting database with {} node(s)", hosts.len()),
            )
            .await;
        let outcome = match self
            .ctx
            .dispatcher
            .start_db(&db, &initiator.pod_ip, &hosts, communal.as_ref(), &sandbox)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ctx
                    .events
                    .warning(&pass.vdb, events::CLUSTER_RESTART_FAILED, format!("Failed to start database: {}", e))
                    .await;
                return Err(e);
            }
        };
        if outcome.aborts_chain() {
            return Ok(outcome);
        }
        self.ctx
            .events
            .normal(&pass.vdb, events::CLUSTER_RESTART_SUCCEEDED, "Database started".to_string())
            .await;
        pass.pfacts.invalidate();
        Ok(Outcome::Continue)
    }

    /// Restart individual down nodes while the rest of the cluster is up
    async fn reconcile_nodes(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        let vclusterops = pass.vdb.use_vclusterops();
        let down_pods: Vec<PodFact> = pass
            .pfacts
            .find_restartable_pods(self.restart_read_only, false, false)
            .into_iter()
            .cloned()
            .collect();

        if !down_pods.is_empty() {
            self.accept_eula(pass, &down_pods).await?;
            let Some(initiator) = pass.pfacts.find_pod_to_run_admin_cmd_any().cloned() else {
                info!("No pod found to run the node restart from");
                return Ok(Outcome::Requeue);
            };
            let outcome = self.restart_pods(pass, &initiator, down_pods).await?;
            if outcome.aborts_chain() {
                return Ok(outcome);
            }
        }

        pass.pfacts.collect(&pass.vdb).await?;
        // Node identity isn't ours to manage here
        if pass.vdb.spec.init_policy == InitPolicy::ScheduleOnly {
            if pass.pfacts.count_not_restartable_pods(vclusterops) > 0 {
                return Ok(Outcome::Requeue);
            }
            return Ok(Outcome::Continue);
        }

        let reip_pods: Vec<PodFact> = self.re_ip_pods(pass, true).into_iter().cloned().collect();
        if !reip_pods.is_empty() {
            let Some(initiator) = pass.pfacts.find_pod_to_run_admin_cmd_any().cloned() else {
                return Ok(Outcome::Requeue);
            };
            let outcome = self.re_ip(pass, &initiator, &reip_pods).await?;
            if outcome.aborts_chain() {
                return Ok(outcome);
            }
            pass.pfacts.collect(&pass.vdb).await?;
        }

        if pass.pfacts.count_not_restartable_pods(vclusterops) > 0 {
            info!("Some pods that need a restart are not running yet, requeueing");
            return Ok(Outcome::Requeue);
        }
        Ok(Outcome::Continue)
    }

    async fn restart_pods(
        &self,
        pass: &mut ReconcilePass,
        initiator: &PodFact,
        pods: Vec<PodFact>,
    ) -> Result<Outcome> {
        let db = DatabaseTarget::from_vdb(&pass.vdb);
        let ips: Vec<String> = pods.iter().map(|pf| pf.pod_ip.clone()).collect();
        let states = self
            .ctx
            .dispatcher
            .fetch_node_state(&db, &initiator.pod_ip, &ips)
            .await?;
        let is_up = |pf: &PodFact| match states.get(&pf.vnode_name) {
            Some(NodeState::Up) => true,
            Some(NodeState::Down) => false,
            _ => pf.up_node,
        };

        let total = pass.pfacts.iter().filter(|pf| pf.is_primary).count();
        let up = pass
            .pfacts
            .iter()
            .filter(|pf| pf.is_primary && is_up(pf))
            .count();
        if 2 * up <= total {
            info!("Only {} of {} primaries are up, waiting for quorum", up, total);
            self.ctx
                .events
                .warning(
                    &pass.vdb,
                    events::QUORUM_LOST,
                    format!("Cannot restart nodes, only {} of {} primary nodes are up", up, total),
                )
                .await;
            return Ok(Outcome::RequeueAfter(self.ctx.config.quorum_requeue));
        }

        // Read-only nodes report UP but still need the restart
        let candidates = pods.len();
        let pods: Vec<PodFact> = pods.into_iter().filter(|pf| pf.read_only || !is_up(pf)).collect();
        // Nodes the cluster already sees as up still get a liveness check later
        let skipped_up = pods.len() < candidates;
        if pods.is_empty() {
            debug!("Every restartable node is already up in the cluster view");
            return self.liveness_probe_wait(pass).await;
        }

        if self.kill_old_processes(&pods).await? {
            return Ok(Outcome::Requeue);
        }
        let (pods, probe_wait) = self.filter_non_active_startup_probe(pods).await?;
        let (pods, slow) = filter_slow_startup(pods);
        if pods.is_empty() {
            return self.liveness_probe_wait(pass).await;
        }

        let hosts: Vec<(String, String)> = pods
            .iter()
            .map(|pf| (pf.vnode_name.clone(), pf.pod_ip.clone()))
            .collect();
        let vnodes: Vec<&str> = hosts.iter().map(|(v, _)| v.as_str()).collect();
        self.ctx
            .events
            .normal(
                &pass.vdb,
                events::NODE_RESTART_STARTED,
                format!("Restarting node(s): {}", vnodes.join(", ")),
            )
            .await;
        let outcome = match self
            .ctx
            .dispatcher
            .restart_node(&db, &initiator.pod_ip, &hosts)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ctx
                    .events
                    .warning(&pass.vdb, events::NODE_RESTART_FAILED, format!("Failed to restart node(s): {}", e))
                    .await;
                return Err(e);
            }
        };
        if outcome.aborts_chain() {
            return Ok(outcome);
        }
        self.ctx
            .events
            .normal(
                &pass.vdb,
                events::NODE_RESTART_SUCCEEDED,
                format!("Restarted node(s): {}", vnodes.join(", ")),
            )
            .await;
        pass.pfacts.invalidate();

        if probe_wait || slow || skipped_up {
            return self.liveness_probe_wait(pass).await;
        }
        Ok(Outcome::Continue)
    }

    /// Pods whose catalog address may be stale
    fn re_ip_pods<'a>(&self, pass: &'a ReconcilePass, nodes_path: bool) -> Vec<&'a PodFact> {
        let vclusterops = pass.vdb.use_vclusterops();
        match (nodes_path, vclusterops) {
            // Restart over RPC refreshes addresses itself
            (true, true) => Vec::new(),
            (true, false) => pass.pfacts.find_re_ip_pods(DbCheck::OnlyWithoutDbs),
            (false, true) => pass.pfacts.find_re_ip_pods(DbCheck::OnlyWithDbs),
            (false, false) => pass.pfacts.find_re_ip_pods(DbCheck::Any),
        }
    }

    async fn re_ip(&self, pass: &mut ReconcilePass, initiator: &PodFact, pods: &[PodFact]) -> Result<Outcome> {
        if pods.is_empty() {
            info!("No pods qualify for re-ip");
            return Ok(Outcome::Continue);
        }
        let vclusterops = pass.vdb.use_vclusterops();
        if !vclusterops {
            // The admintools map needs every node's address
            let not_running = pass
                .pfacts
                .iter()
                .any(|pf| pf.db_exists && pf.managed_by_parent && !pf.is_pod_running);
            if not_running {
                info!("Waiting for all pods with a database to be running before re-ip");
                return Ok(Outcome::Requeue);
            }
        }

        let hosts: Vec<ReIpHost> = pods
            .iter()
            .map(|pf| ReIpHost {
                vnode: pf.vnode_name.clone(),
                compat21_node: pf.compat21_node_name.clone(),
                ip: pf.pod_ip.clone(),
            })
            .collect();
        let db = DatabaseTarget::from_vdb(&pass.vdb);
        let communal = if vclusterops {
            CommunalParams::from_vdb(&pass.vdb)
        } else {
            None
        };
        let outcome = match self
            .ctx
            .dispatcher
            .re_ip(&db, &initiator.pod_ip, &hosts, communal.as_ref())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.ctx
                    .events
                    .warning(&pass.vdb, events::REIP_FAILED, format!("Failed to re-ip nodes: {}", e))
                    .await;
                return Err(e);
            }
        };
        pass.pfacts.invalidate();
        Ok(outcome)
    }

    /// Kill spread in read-only pods and in pods with the agent sidecar.
    /// Returns true if any process was killed.
    async fn kill_old_processes(&self, pods: &[PodFact]) -> Result<bool> {
        let cmd = vec!["bash".to_string(), "-c".to_string(), KILL_SPREAD_SCRIPT.to_string()];
        let mut killed = false;
        for pf in pods {
            if !pf.is_pod_running || !(pf.read_only || pf.has_nma_sidecar) {
                continue;
            }
            let out = self
                .ctx
                .runner
                .exec_in_pod(&pf.name, meta::SERVER_CONTAINER, &cmd)
                .await?;
            if out.stdout.contains(KILLED_MARKER) {
                info!("Killed old server process in pod {}", pf.name);
                killed = true;
            }
        }
        Ok(killed)
    }

    /// Drop pods whose startup probe has finished; their liveness probe
    /// would kill the pod mid-restart. Returns the kept pods and whether
    /// any were dropped.
    async fn filter_non_active_startup_probe(&self, pods: Vec<PodFact>) -> Result<(Vec<PodFact>, bool)> {
        let mut kept = Vec::with_capacity(pods.len());
        let mut dropped = false;
        for pf in pods {
            if pf.has_nma_sidecar || self.is_startup_probe_active(&pf).await? {
                kept.push(pf);
            } else {
                debug!("Startup probe of {} is no longer active", pf.name);
                dropped = true;
            }
        }
        Ok((kept, dropped))
    }

    async fn is_startup_probe_active(&self, pf: &PodFact) -> Result<bool> {
        let pod = match self.ctx.client.get_pod(&pf.name).await {
            Ok(pod) => pod,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        if server_container(&pod).is_none_or(|c| c.liveness_probe.is_none()) {
            return Ok(true);
        }
        let started = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .and_then(|cs| cs.iter().find(|c| c.name == meta::SERVER_CONTAINER))
            .and_then(|c| c.started);
        Ok(!started.unwrap_or(false))
    }

    /// Requeue after a fraction of the liveness probe's failure window
    async fn liveness_probe_wait(&self, pass: &ReconcilePass) -> Result<Outcome> {
        let scs = pass.vdb.subclusters_in_scope(pass.pfacts.sandbox());
        let Some(sc) = scs.first() else {
            return Ok(Outcome::Requeue);
        };
        let key = names::pod_name(&pass.vdb, sc, 0);
        let pod = match self.ctx.client.get_pod(&key).await {
            Ok(pod) => pod,
            Err(e) if e.is_not_found() => return Ok(Outcome::Requeue),
            Err(e) => return Err(e),
        };
        let Some(probe) = server_container(&pod).and_then(|c| c.liveness_probe.as_ref()) else {
            return Ok(Outcome::Requeue);
        };
        let wait = self.ctx.config.probe_wait(
            probe.period_seconds.unwrap_or(10),
            probe.failure_threshold.unwrap_or(3),
        );
        info!("Requeueing in {:?} to let the liveness probe settle", wait);
        Ok(Outcome::RequeueAfter(wait))
    }

    /// Accept the license on pods that lack the marker. admintools only.
    async fn accept_eula(&self, pass: &ReconcilePass, pods: &[PodFact]) -> Result<()> {
        if pass.vdb.use_vclusterops() {
            return Ok(());
        }
        let cmd = vec![
            "bash".to_string(),
            "-c".to_string(),
            format!(
                "mkdir -p $(dirname {f}) && touch {f}",
                f = meta::EULA_ACCEPTANCE_FILE
            ),
        ];
        for pf in pods.iter().filter(|pf| !pf.eula_accepted && pf.is_pod_running) {
            self.ctx
                .runner
                .exec_in_pod(&pf.name, meta::SERVER_CONTAINER, &cmd)
                .await?;
            debug!("Accepted EULA in pod {}", pf.name);
        }
        Ok(())
    }
}

/// Drop pods still working through a slow startup
fn filter_slow_startup(pods: Vec<PodFact>) -> (Vec<PodFact>, bool) {
    let before = pods.len();
    let kept: Vec<PodFact> = pods
        .into_iter()
        .filter(|pf| {
            if pf.startup_in_progress {
                info!("Pod {} is still starting up", pf.name);
            }
            !pf.startup_in_progress
        })
        .collect();
    let dropped = kept.len() != before;
    (kept, dropped)
}

#[async_trait]
impl ReconcileActor for RestartReconciler {
    fn name(&self) -> &'static str {
        "RestartReconciler"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        if !pass.vdb.spec.auto_restart_vertica {
            self.set_auto_restart_condition(pass, false).await?;
            return Ok(Outcome::Continue);
        }
        self.set_auto_restart_condition(pass, true).await?;

        if pass.vdb.use_vclusterops() && !pass.vdb.is_db_initialized() {
            debug!("Database not initialized yet, skipping restart");
            return Ok(Outcome::Continue);
        }

        pass.pfacts.collect(&pass.vdb).await?;
        let schedule_only = pass.vdb.spec.init_policy == InitPolicy::ScheduleOnly;
        if pass.pfacts.get_up_node_and_not_read_only_count() == 0
            && !schedule_only
            && pass.pfacts.get_shutdown_count() == 0
        {
            return self.reconcile_cluster(pass).await;
        }
        let outcome = self.reconcile_nodes(pass).await?;
        if outcome.is_requeue() {
            warn!("Node restart for {} not finished, requeueing", pass.vdb.key());
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::DispatchCall;
    use crate::podfacts::PodFacts;
    use crate::testing::{make_test_vdb, PodState, TestWorld};
    use std::time::Duration;

    async fn make_test_pass(world: &TestWorld, states: &[PodState]) -> ReconcilePass {
        let vdb = make_test_vdb();
        world.add_vdb(vdb.clone()).await;
        world.add_pods(&vdb, "main", states).await;
        let vdb = world.vdb().await;
        ReconcilePass::new(vdb, PodFacts::new(world.ctx.clone(), ""))
    }

    #[tokio::test]
    async fn test_all_down_takes_cluster_path() {
        let world = TestWorld::new();
        let mut pass = make_test_pass(&world, &[PodState::down(), PodState::down(), PodState::down()]).await;
        let actor = RestartReconciler::new(world.ctx.clone(), true);

        let outcome = actor.reconcile(&mut pass).await.unwrap();
        assert_eq!(outcome, Outcome::Continue);
        let verbs = world.dispatcher.verbs().await;
        assert!(verbs.contains(&"StartDB"));
        assert!(!verbs.contains(&"RestartNode"));
        assert_eq!(verbs.iter().position(|v| *v == "ReIP"), Some(0));

        let start = world
            .dispatcher
            .calls()
            .await
            .into_iter()
            .find(|c| c.verb() == "StartDB")
            .unwrap();
        assert!(matches!(
            start,
            DispatchCall::StartDb { ref hosts, ref sandbox, .. } if hosts.len() == 3 && sandbox.is_empty()
        ));
        assert!(world.events.reasons().contains(&events::CLUSTER_RESTART_SUCCEEDED.to_string()));
        assert!(world.vdb().await.is_condition_true(conditions::AUTO_RESTART_VERTICA));
    }

    #[tokio::test]
    async fn test_node_restart_requeues_without_quorum() {
        let world = TestWorld::new();
        let mut pass = make_test_pass(&world, &[PodState::up(), PodState::down(), PodState::down()]).await;
        let actor = RestartReconciler::new(world.ctx.clone(), true);

        let outcome = actor.reconcile(&mut pass).await.unwrap();
        assert_eq!(outcome, Outcome::RequeueAfter(Duration::from_secs(10)));
        assert_eq!(world.dispatcher.count("RestartNode").await, 0);
        assert!(world.events.reasons().contains(&events::QUORUM_LOST.to_string()));
    }

    async fn make_test_pass_with_size(world: &TestWorld, states: &[PodState]) -> ReconcilePass {
        let mut vdb = make_test_vdb();
        vdb.spec.subclusters[0].size = states.len() as i32;
        world.add_vdb(vdb.clone()).await;
        world.add_pods(&vdb, "main", states).await;
        let vdb = world.vdb().await;
        ReconcilePass::new(vdb, PodFacts::new(world.ctx.clone(), ""))
    }

    #[tokio::test]
    async fn test_node_restart_requeues_at_exact_half_of_primaries() {
        let world = TestWorld::new();
        let mut pass = make_test_pass_with_size(
            &world,
            &[PodState::up(), PodState::up(), PodState::down(), PodState::down()],
        )
        .await;
        let actor = RestartReconciler::new(world.ctx.clone(), true);

        let outcome = actor.reconcile(&mut pass).await.unwrap();
        assert_eq!(outcome, Outcome::RequeueAfter(Duration::from_secs(10)));
        assert_eq!(world.dispatcher.count("RestartNode").await, 0);
    }

    #[tokio::test]
    async fn test_node_reported_up_by_cluster_still_requeues() {
        let world = TestWorld::new();
        let mut pass = make_test_pass_with_size(
            &world,
            &[
                PodState::up(),
                PodState::up(),
                PodState::up(),
                PodState::down(),
                PodState::down(),
            ],
        )
        .await;
        world
            .dispatcher
            .set_node_state("v_vertdb_node0004", NodeState::Up)
            .await;
        let actor = RestartReconciler::new(world.ctx.clone(), true);

        // Node 5 restarts now; node 4 is rechecked after the liveness wait
        let outcome = actor.reconcile(&mut pass).await.unwrap();
        assert_eq!(outcome, Outcome::RequeueAfter(Duration::from_secs(45)));
        let restart = world
            .dispatcher
            .calls()
            .await
            .into_iter()
            .find(|c| c.verb() == "RestartNode")
            .unwrap();
        assert!(matches!(
            restart,
            DispatchCall::RestartNode { ref hosts, .. }
                if hosts.len() == 1 && hosts[0].0 == "v_vertdb_node0005"
        ));
    }

    #[tokio::test]
    async fn test_node_restart_of_single_down_node() {
        let world = TestWorld::new();
        let mut pass = make_test_pass(&world, &[PodState::up(), PodState::up(), PodState::down()]).await;
        let actor = RestartReconciler::new(world.ctx.clone(), true);

        let outcome = actor.reconcile(&mut pass).await.unwrap();
        assert_eq!(outcome, Outcome::Continue);
        let restart = world
            .dispatcher
            .calls()
            .await
            .into_iter()
            .find(|c| c.verb() == "RestartNode")
            .unwrap();
        assert_eq!(
            restart,
            DispatchCall::RestartNode {
                initiator: "10.0.0.1".to_string(),
                hosts: vec![("v_vertdb_node0003".to_string(), "10.0.0.3".to_string())],
            }
        );
        assert_eq!(world.dispatcher.count("StartDB").await, 0);
    }

    #[tokio::test]
    async fn test_killed_read_only_process_requeues() {
        let world = TestWorld::new();
        let mut pass = make_test_pass(&world, &[PodState::up(), PodState::up(), PodState::read_only()]).await;
        let ro_pod = names::pod_name(&pass.vdb, &pass.vdb.spec.subclusters[0], 2);
        world.runner.set_output(&ro_pod, "pgrep", "Killing process 42\n").await;
        let actor = RestartReconciler::new(world.ctx.clone(), true);

        let outcome = actor.reconcile(&mut pass).await.unwrap();
        assert_eq!(outcome, Outcome::Requeue);
        assert_eq!(world.runner.calls_matching("pgrep").await.len(), 1);
        assert_eq!(world.dispatcher.count("RestartNode").await, 0);
    }

    #[tokio::test]
    async fn test_slow_startup_waits_on_liveness_probe() {
        let world = TestWorld::new();
        let slow = PodState {
            pid_running: true,
            startup_complete: false,
            ..PodState::down()
        };
        let mut pass = make_test_pass(&world, &[PodState::up(), PodState::up(), slow]).await;
        let actor = RestartReconciler::new(world.ctx.clone(), true);

        // period 30s * threshold 6 * 0.25
        let outcome = actor.reconcile(&mut pass).await.unwrap();
        assert_eq!(outcome, Outcome::RequeueAfter(Duration::from_secs(45)));
        assert_eq!(world.dispatcher.count("RestartNode").await, 0);
    }

    #[tokio::test]
    async fn test_auto_restart_disabled_is_a_noop() {
        let world = TestWorld::new();
        let mut pass = make_test_pass(&world, &[PodState::down(), PodState::down(), PodState::down()]).await;
        let vdb = world.vdb().await;
        let mut vdb_off = vdb.clone();
        vdb_off.spec.auto_restart_vertica = false;
        world.client.insert_vdb(vdb_off).await;
        pass.vdb = world.vdb().await;
        let actor = RestartReconciler::new(world.ctx.clone(), true);

        assert_eq!(actor.reconcile(&mut pass).await.unwrap(), Outcome::Continue);
        assert!(world.dispatcher.calls().await.is_empty());
        let cond = pass
            .vdb
            .status
            .as_ref()
            .unwrap()
            .conditions
            .iter()
            .find(|c| c.type_ == conditions::AUTO_RESTART_VERTICA)
            .cloned()
            .unwrap();
        assert_eq!(cond.status, "False");
    }

    #[tokio::test]
    async fn test_uninitialized_db_is_skipped() {
        let world = TestWorld::new();
        let mut vdb = make_test_vdb();
        vdb.status = None;
        world.add_vdb(vdb.clone()).await;
        world.add_pods(&vdb, "main", &[PodState::down()]).await;
        let mut pass = ReconcilePass::new(world.vdb().await, PodFacts::new(world.ctx.clone(), ""));
        let actor = RestartReconciler::new(world.ctx.clone(), true);

        assert_eq!(actor.reconcile(&mut pass).await.unwrap(), Outcome::Continue);
        assert!(world.dispatcher.calls().await.is_empty());
    }
}
