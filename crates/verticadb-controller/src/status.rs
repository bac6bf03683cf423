use crate::actor::{ReconcileActor, ReconcilePass};
use crate::context::OperatorContext;
use crate::error::Result;
use crate::podfacts::PodFacts;
use crate::update;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use verticadb_core::{meta, names, Outcome, PodStatusDetail, Subcluster, SubclusterStatus, VerticaDB, VerticaDbStatus};

/// Refreshes `status.subclusters` for the pass's scope from pod facts and
/// keeps the ready-status annotation in step
pub struct StatusReconciler {
    ctx: Arc<OperatorContext>,
}

impl StatusReconciler {
    pub fn new(ctx: Arc<OperatorContext>) -> Self {
        Self { ctx }
    }

    async fn update_ready_status_annotation(&self, pass: &mut ReconcilePass) -> Result<()> {
        let result = update::update_vdb(&self.ctx, &pass.vdb.key(), |vdb| {
            let (up, added) = vdb
                .status
                .as_ref()
                .map(|s| (s.up_node_count, s.added_to_db_count))
                .unwrap_or_default();
            let value = format!("{}/{}", up, added);
            let annotations = vdb.metadata.annotations.get_or_insert_with(Default::default);
            if annotations.get(meta::READY_STATUS_ANNOTATION) == Some(&value) {
                return false;
            }
            info!("Refreshing ready status annotation to {}", value);
            annotations.insert(meta::READY_STATUS_ANNOTATION.to_string(), value);
            true
        })
        .await;
        match result {
            Ok((vdb, _)) => pass.vdb = vdb,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// Rebuild the status of every spec subcluster. Entries owned by another
/// scope are carried over untouched.
fn refresh_status(status: &mut VerticaDbStatus, vdb: &VerticaDB, pfacts: &PodFacts) -> bool {
    let before = status.clone();
    let mut prior: HashMap<String, SubclusterStatus> = status
        .subclusters
        .drain(..)
        .map(|s| (s.name.clone(), s))
        .collect();
    let sb_map = vdb.subcluster_sandbox_status_map();

    for sc in &vdb.spec.subclusters {
        let mut cur = prior.remove(&sc.name).unwrap_or_default();
        cur.name = sc.name.clone();
        let owner = sb_map.get(&sc.name).map(String::as_str).unwrap_or(meta::MAIN_CLUSTER);
        if owner == pfacts.sandbox() {
            cur.shutdown = vdb.is_subcluster_shutdown(sc);
            calculate_subcluster_status(vdb, sc, pfacts, &mut cur);
        }
        status.subclusters.push(cur);
    }

    status.subcluster_count = status.subclusters.len() as i32;
    status.added_to_db_count = status.subclusters.iter().map(|s| s.added_to_db_count).sum();
    status.up_node_count = status.subclusters.iter().map(|s| s.up_node_count).sum();
    *status != before
}

fn calculate_subcluster_status(vdb: &VerticaDB, sc: &Subcluster, pfacts: &PodFacts, cur: &mut SubclusterStatus) {
    cur.detail.resize(sc.size.max(0) as usize, PodStatusDetail::default());
    let shut_down = vdb.desired_replicas(sc) == 0 && sc.size != 0;
    for (index, detail) in cur.detail.iter_mut().enumerate() {
        let Some(pf) = pfacts.get(&names::pod_name(vdb, sc, index as i32)) else {
            continue;
        };
        // Pods are gone; keep the vnode but report nothing running
        if shut_down {
            detail.up_node = false;
            detail.installed = false;
            detail.added_to_db = false;
            continue;
        }
        detail.up_node = pf.up_node;
        detail.installed = pf.is_installed;
        detail.added_to_db = pf.db_exists;
        if !pf.vnode_name.is_empty() {
            detail.vnode_name = pf.vnode_name.clone();
        }
        if !pf.subcluster_oid.is_empty() {
            cur.oid = pf.subcluster_oid.clone();
        }
    }
    cur.added_to_db_count = cur.detail.iter().filter(|d| d.added_to_db).count() as i32;
    cur.up_node_count = cur.detail.iter().filter(|d| d.up_node).count() as i32;
}

#[async_trait]
impl ReconcileActor for StatusReconciler {
    fn name(&self) -> &'static str {
        "StatusReconciler"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        pass.pfacts.collect(&pass.vdb).await?;
        let spec_vdb = pass.vdb.clone();
        let pfacts = &pass.pfacts;
        let (vdb, _) = update::update_vdb_status(&self.ctx, &spec_vdb.key(), |status| {
            refresh_status(status, &spec_vdb, pfacts)
        })
        .await?;
        pass.vdb = vdb;
        self.update_ready_status_annotation(pass).await?;
        Ok(Outcome::Continue)
    }
}
