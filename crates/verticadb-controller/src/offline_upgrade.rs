//! Offline image change for one cluster scope.
//!
//! The whole cluster (or sandbox) is stopped, the StatefulSets get the new
//! image and the old pods are deleted so they come back on it. Starting the
//! database again is left to the restart reconciler further down the chain.

use crate::actor::{ReconcileActor, ReconcilePass};
use crate::context::OperatorContext;
use crate::error::Result;
use crate::events::EventPublisherExt;
use crate::podfacts::server_container;
use crate::types::DatabaseTarget;
use crate::update;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use std::sync::Arc;
use tracing::{debug, info};
use verticadb_core::crd::conditions;
use verticadb_core::{events, meta, names, ObjectKey, Outcome};

pub struct OfflineUpgradeReconciler {
    ctx: Arc<OperatorContext>,
}

/// Image of the server container in a StatefulSet's pod template
fn sts_server_image(sts: &StatefulSet) -> Option<&str> {
    sts.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == meta::SERVER_CONTAINER)
        .and_then(|c| c.image.as_deref())
}

impl OfflineUpgradeReconciler {
    pub fn new(ctx: Arc<OperatorContext>) -> Self {
        Self { ctx }
    }

    fn sts_keys(&self, pass: &ReconcilePass) -> Vec<ObjectKey> {
        pass.vdb
            .subclusters_in_scope(pass.pfacts.sandbox())
            .into_iter()
            .map(|sc| names::sts_name(&pass.vdb, sc))
            .collect()
    }

    async fn is_upgrade_needed(&self, pass: &ReconcilePass) -> Result<bool> {
        if pass.vdb.is_condition_true(conditions::UPGRADE_IN_PROGRESS) {
            return Ok(true);
        }
        let target = pass.vdb.target_image(pass.pfacts.sandbox());
        for key in self.sts_keys(pass) {
            match self.ctx.client.get_statefulset(&key).await {
                Ok(sts) => {
                    if sts_server_image(&sts).is_some_and(|img| img != target) {
                        return Ok(true);
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    async fn set_upgrade_condition(&self, pass: &mut ReconcilePass, value: bool) -> Result<bool> {
        let reason = if value { "UpgradeStarted" } else { "UpgradeFinished" };
        let (vdb, changed) = update::update_vdb_status(&self.ctx, &pass.vdb.key(), |s| {
            s.set_condition(conditions::UPGRADE_IN_PROGRESS, value, reason)
        })
        .await?;
        pass.vdb = vdb;
        Ok(changed)
    }

    /// Stop the database if any node is still up on the old image
    async fn stop_cluster(&self, pass: &mut ReconcilePass, target: &str) -> Result<()> {
        let old_image_up = pass
            .pfacts
            .iter()
            .any(|pf| pf.up_node && pf.image != target);
        if !old_image_up {
            debug!("No node is up on the old image, skipping stop");
            return Ok(());
        }
        let Some(initiator) = pass.pfacts.find_first_up_pod(true, None).cloned() else {
            return Ok(());
        };
        let db = DatabaseTarget::from_vdb(&pass.vdb);
        let sandbox = pass.pfacts.sandbox().to_string();
        if let Err(e) = self
            .ctx
            .dispatcher
            .stop_db(&db, &initiator.pod_ip, &sandbox)
            .await
        {
            self.ctx
                .events
                .warning(&pass.vdb, events::STOP_DB_FAILED, format!("Failed to stop the database: {}", e))
                .await;
            return Err(e);
        }
        info!("Stopped database for upgrade of {}", pass.vdb.key());
        pass.pfacts.invalidate();
        Ok(())
    }

    async fn update_images(&self, pass: &mut ReconcilePass, target: &str) -> Result<()> {
        let mut changed_any = false;
        for key in self.sts_keys(pass) {
            let result = update::update_statefulset(&self.ctx, &key, |sts| {
                let Some(ps) = sts.spec.as_mut().and_then(|s| s.template.spec.as_mut()) else {
                    return false;
                };
                let mut changed = false;
                for c in ps.containers.iter_mut() {
                    if (c.name == meta::SERVER_CONTAINER || c.name == meta::NMA_CONTAINER)
                        && c.image.as_deref() != Some(target)
                    {
                        c.image = Some(target.to_string());
                        changed = true;
                    }
                }
                changed
            })
            .await;
            match result {
                Ok((_, true)) => {
                    info!("Set image {} in StatefulSet {}", target, key);
                    changed_any = true;
                }
                Ok((_, false)) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        if changed_any {
            pass.pfacts.invalidate();
        }
        Ok(())
    }

    async fn delete_old_pods(&self, pass: &mut ReconcilePass, target: &str) -> Result<()> {
        pass.pfacts.collect(&pass.vdb).await?;
        let old: Vec<ObjectKey> = pass
            .pfacts
            .iter()
            .filter(|pf| pf.exists && pf.image != target)
            .map(|pf| pf.name.clone())
            .collect();
        for name in &old {
            self.ctx.client.delete_pod(name).await?;
            info!("Deleted pod {} running the old image", name);
        }
        if !old.is_empty() {
            pass.pfacts.invalidate();
        }
        Ok(())
    }

    async fn any_pod_with_new_image(&self, pass: &ReconcilePass, target: &str) -> Result<bool> {
        for sc in pass.vdb.subclusters_in_scope(pass.pfacts.sandbox()) {
            for name in names::gen_pod_names(&pass.vdb, sc) {
                match self.ctx.client.get_pod(&name).await {
                    Ok(pod) => {
                        if server_container(&pod).and_then(|c| c.image.as_deref()) == Some(target) {
                            return Ok(true);
                        }
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl ReconcileActor for OfflineUpgradeReconciler {
    fn name(&self) -> &'static str {
        "OfflineUpgradeReconciler"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        if !self.is_upgrade_needed(pass).await? {
            return Ok(Outcome::Continue);
        }
        pass.pfacts.collect(&pass.vdb).await?;
        let target = pass.vdb.target_image(pass.pfacts.sandbox()).to_string();

        if self.set_upgrade_condition(pass, true).await? {
            self.ctx
                .events
                .normal(&pass.vdb, events::UPGRADE_START, format!("Offline upgrade to {} started", target))
                .await;
        }
        self.stop_cluster(pass, &target).await?;
        self.update_images(pass, &target).await?;
        self.delete_old_pods(pass, &target).await?;

        if !self.any_pod_with_new_image(pass, &target).await? {
            info!("Waiting for a pod with image {} to exist", target);
            return Ok(Outcome::RequeueAfter(self.ctx.config.upgrade_requeue));
        }

        self.set_upgrade_condition(pass, false).await?;
        self.ctx
            .events
            .normal(&pass.vdb, events::UPGRADE_SUCCEEDED, format!("Offline upgrade to {} finished", target))
            .await;
        Ok(Outcome::Continue)
    }
}
