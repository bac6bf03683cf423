use crate::actor::{ReconcileActor, ReconcilePass};
use crate::context::OperatorContext;
use crate::error::Result;
use crate::update;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use verticadb_core::{Outcome, VerticaDB};

/// Copies a sandbox's shutdown request onto its member subclusters.
///
/// Only ever sets the flag. Clearing it belongs to the sandbox restart,
/// once the sandbox is back up.
pub struct ShutdownSpecReconciler {
    ctx: Arc<OperatorContext>,
}

impl ShutdownSpecReconciler {
    pub fn new(ctx: Arc<OperatorContext>) -> Self {
        Self { ctx }
    }
}

fn sync_subcluster_shutdown(vdb: &mut VerticaDB) -> bool {
    let shut_sandboxes: Vec<String> = vdb
        .spec
        .sandboxes
        .iter()
        .filter(|sb| sb.shutdown)
        .map(|sb| sb.name.clone())
        .collect();
    let sb_map = vdb.subcluster_sandbox_map();
    let mut changed = false;
    for sc in vdb.spec.subclusters.iter_mut() {
        let Some(sb) = sb_map.get(&sc.name) else {
            continue;
        };
        if shut_sandboxes.contains(sb) && !sc.shutdown {
            info!("Marking subcluster {} shut down with sandbox {}", sc.name, sb);
            sc.shutdown = true;
            changed = true;
        }
    }
    changed
}

#[async_trait]
impl ReconcileActor for ShutdownSpecReconciler {
    fn name(&self) -> &'static str {
        "ShutdownSpecReconciler"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        if !sync_subcluster_shutdown(&mut pass.vdb.clone()) {
            return Ok(Outcome::Continue);
        }
        let (vdb, _) = update::update_vdb(&self.ctx, &pass.vdb.key(), sync_subcluster_shutdown).await?;
        pass.vdb = vdb;
        Ok(Outcome::Continue)
    }
}
