//! Moves subclusters out of a sandbox and back into the main cluster.
//!
//! The work is driven by the sandbox ConfigMap: a trigger annotation asks
//! for an unsandbox, and the ConfigMap itself is deleted once the sandbox
//! has no subclusters left. Every step reads its inputs from the VerticaDB
//! status and the ConfigMap, so an interrupted pass is picked up by the
//! next one.

use crate::actor::{ReconcileActor, ReconcilePass};
use crate::context::OperatorContext;
use crate::error::{ControllerError, Result};
use crate::events::EventPublisherExt;
use crate::podfacts::PodFacts;
use crate::types::{DatabaseTarget, UnsandboxRequest};
use crate::update;
use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use verticadb_core::{events, meta, names, InitPolicy, ObjectKey, Outcome, VerticaDB};

pub struct UnsandboxSubclusterReconciler {
    ctx: Arc<OperatorContext>,
}

/// Subclusters the status still places in `sandbox` but the spec no longer
/// does. All of them when the sandbox was removed from the spec.
fn subclusters_to_unsandbox(vdb: &VerticaDB, sandbox: &str) -> Vec<String> {
    let Some(status) = vdb.find_sandbox_status(sandbox) else {
        return Vec::new();
    };
    let wanted: Vec<&str> = vdb
        .find_sandbox(sandbox)
        .map(|sb| sb.subclusters.iter().map(|sc| sc.name.as_str()).collect())
        .unwrap_or_default();
    status
        .subclusters
        .iter()
        .filter(|sc| !wanted.contains(&sc.as_str()))
        .cloned()
        .collect()
}

impl UnsandboxSubclusterReconciler {
    pub fn new(ctx: Arc<OperatorContext>) -> Self {
        Self { ctx }
    }

    /// Drop subclusters from the sandbox status once the catalog reports
    /// them back in the main cluster
    async fn reconcile_sandbox_status(&self, pass: &mut ReconcilePass, main: &PodFacts) -> Result<()> {
        let status_map = pass.vdb.subcluster_sandbox_status_map();
        let stale = main.find_unsandboxed_subclusters_still_in_sandbox_status(&status_map);
        for (sandbox, subclusters) in stale {
            info!(
                "Subclusters {:?} are no longer in sandbox {}, updating status",
                subclusters, sandbox
            );
            let (vdb, _) = update::update_vdb_status(&self.ctx, &pass.vdb.key(), |s| {
                s.remove_subclusters_from_sandbox(&sandbox, &subclusters)
            })
            .await?;
            pass.vdb = vdb;
        }
        Ok(())
    }

    /// Delete the ConfigMap when the sandbox is gone from status, else
    /// clear the trigger annotation. Returns true if it was deleted.
    async fn process_config_map(&self, pass: &ReconcilePass, sandbox: &str, key: &ObjectKey) -> Result<bool> {
        if pass.vdb.find_sandbox_status(sandbox).is_none() {
            self.ctx.client.delete_config_map(key).await?;
            info!("Deleted ConfigMap {}, sandbox {} has no subclusters left", key, sandbox);
            return Ok(true);
        }
        let patch = BTreeMap::from([(meta::UNSANDBOX_TRIGGER_ID_ANNOTATION.to_string(), None)]);
        self.ctx.client.patch_config_map_annotations(key, &patch).await?;
        info!("Cleared unsandbox trigger on ConfigMap {}", key);
        Ok(false)
    }

    /// Persist the subclusters that left the sandbox: status first, then
    /// the type change in spec
    async fn record_unsandboxed(&self, pass: &mut ReconcilePass, sandbox: &str, subclusters: &[String]) -> Result<()> {
        let (vdb, _) = update::update_vdb_status(&self.ctx, &pass.vdb.key(), |s| {
            s.remove_subclusters_from_sandbox(sandbox, subclusters)
        })
        .await?;
        pass.vdb = vdb;
        let (vdb, _) = update::update_vdb(&self.ctx, &pass.vdb.key(), |v| {
            v.spec.demote_sandbox_primaries(subclusters)
        })
        .await?;
        pass.vdb = vdb;
        Ok(())
    }

    async fn unsandbox_one(
        &self,
        pass: &ReconcilePass,
        main: &mut PodFacts,
        initiator_ip: &str,
        sandbox: &str,
        subcluster: &str,
    ) -> Result<Outcome> {
        main.invalidate();
        main.collect(&pass.vdb).await?;
        let node_address_map = main.find_node_name_and_address_in_subcluster(subcluster);
        main.remove_startup_file_in_subcluster_pods(subcluster).await?;

        let mut sandbox_facts = pass.pfacts.copy(sandbox);
        sandbox_facts.collect(&pass.vdb).await?;
        let sandbox_initiator_ip = sandbox_facts.find_first_up_pod_ip(false, None);

        let request = UnsandboxRequest {
            initiator_ip: initiator_ip.to_string(),
            sandbox_initiator_ip,
            subcluster: subcluster.to_string(),
            sandbox: sandbox.to_string(),
            node_address_map,
        };
        self.ctx
            .events
            .normal(
                &pass.vdb,
                events::UNSANDBOX_SUBCLUSTER_START,
                format!("Starting unsandbox of subcluster {} from sandbox {}", subcluster, sandbox),
            )
            .await;
        let db = DatabaseTarget::from_vdb(&pass.vdb);
        match self.ctx.dispatcher.unsandbox_subcluster(&db, &request).await {
            Ok(outcome) => {
                if outcome.aborts_chain() {
                    return Ok(outcome);
                }
                self.ctx
                    .events
                    .normal(
                        &pass.vdb,
                        events::UNSANDBOX_SUBCLUSTER_SUCCEEDED,
                        format!("Subcluster {} left sandbox {}", subcluster, sandbox),
                    )
                    .await;
                Ok(Outcome::Continue)
            }
            Err(e) => {
                self.ctx
                    .events
                    .warning(
                        &pass.vdb,
                        events::UNSANDBOX_SUBCLUSTER_FAILED,
                        format!("Failed to unsandbox subcluster {} from {}: {}", subcluster, sandbox, e),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn unsandbox_subclusters(
        &self,
        pass: &mut ReconcilePass,
        main: &mut PodFacts,
        sandbox: &str,
        cm_key: &ObjectKey,
        subclusters: Vec<String>,
    ) -> Result<Outcome> {
        let Some(initiator_ip) = main.find_first_primary_up_pod_ip() else {
            info!("No up primary in the main cluster to unsandbox from, requeueing");
            return Ok(Outcome::Requeue);
        };

        let mut done: Vec<String> = Vec::new();
        let mut stopped: Option<Result<Outcome>> = None;
        for sc in &subclusters {
            match self.unsandbox_one(pass, main, &initiator_ip, sandbox, sc).await {
                Ok(Outcome::Continue) => done.push(sc.clone()),
                other => {
                    stopped = Some(other);
                    break;
                }
            }
        }

        if let Some(result) = stopped {
            // Keep whatever already moved before reporting
            if !done.is_empty() {
                let persisted = self.record_unsandboxed(pass, sandbox, &done).await;
                pass.pfacts.invalidate();
                if let Err(e) = persisted {
                    let mut errors = vec![e];
                    if let Err(e) = result {
                        errors.insert(0, e);
                    }
                    return Err(ControllerError::aggregate(errors));
                }
            }
            return result;
        }

        self.record_unsandboxed(pass, sandbox, &done).await?;
        self.process_config_map(pass, sandbox, cm_key).await?;
        pass.pfacts.invalidate();
        Ok(Outcome::Continue)
    }
}

#[async_trait]
impl ReconcileActor for UnsandboxSubclusterReconciler {
    fn name(&self) -> &'static str {
        "UnsandboxSubclusterReconciler"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        if !pass.vdb.is_eon() || pass.vdb.spec.init_policy == InitPolicy::ScheduleOnly {
            return Ok(Outcome::Continue);
        }
        let sandbox = pass.pfacts.sandbox().to_string();

        let mut main = pass.pfacts.copy(meta::MAIN_CLUSTER);
        main.collect(&pass.vdb).await?;
        self.reconcile_sandbox_status(pass, &main).await?;

        let cm_key = names::sandbox_config_map_name(&pass.vdb, &sandbox);
        let cm = match self.ctx.client.get_config_map(&cm_key).await {
            Ok(cm) => cm,
            Err(e) if e.is_not_found() => {
                debug!("ConfigMap {} is gone, nothing to do", cm_key);
                return Ok(Outcome::Stop);
            }
            Err(e) => return Err(e),
        };

        if pass.vdb.find_sandbox_status(&sandbox).is_none() {
            self.process_config_map(pass, &sandbox, &cm_key).await?;
            return Ok(Outcome::Stop);
        }

        let subclusters = subclusters_to_unsandbox(&pass.vdb, &sandbox);
        let Some(trigger) = meta::unsandbox_trigger_id(cm.annotations()) else {
            return Ok(Outcome::Continue);
        };
        if subclusters.is_empty() {
            info!("Unsandbox trigger {} has nothing left to move", trigger);
            self.process_config_map(pass, &sandbox, &cm_key).await?;
            return Ok(Outcome::Continue);
        }

        let cm_vdb = cm
            .data
            .as_ref()
            .and_then(|d| d.get(meta::VERTICADB_NAME_KEY))
            .map(String::as_str)
            .unwrap_or_default();
        if cm_vdb != pass.vdb.name_any() {
            warn!(
                "ConfigMap {} names VerticaDB {}, not {}, skipping unsandbox",
                cm_key,
                cm_vdb,
                pass.vdb.name_any()
            );
            return Ok(Outcome::Continue);
        }

        info!(
            "Unsandboxing {:?} from sandbox {} (trigger {})",
            subclusters, sandbox, trigger
        );
        self.unsandbox_subclusters(pass, &mut main, &sandbox, &cm_key, subclusters)
            .await
    }
}
