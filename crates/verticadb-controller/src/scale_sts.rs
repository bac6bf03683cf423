use crate::actor::{ReconcileActor, ReconcilePass};
use crate::context::OperatorContext;
use crate::error::Result;
use crate::update;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use verticadb_core::{names, Outcome};

/// Drives each in-scope StatefulSet's replica count to the subcluster's
/// desired size, which is zero while the spec or the recorded status has the
/// subcluster shut down
pub struct ScaleStatefulsetReconciler {
    ctx: Arc<OperatorContext>,
}

impl ScaleStatefulsetReconciler {
    pub fn new(ctx: Arc<OperatorContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ReconcileActor for ScaleStatefulsetReconciler {
    fn name(&self) -> &'static str {
        "ScaleStatefulsetReconciler"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        let mut scaled = false;
        for sc in pass.vdb.subclusters_in_scope(pass.pfacts.sandbox()) {
            let key = names::sts_name(&pass.vdb, sc);
            let desired = pass.vdb.desired_replicas(sc);
            let result = update::update_statefulset(&self.ctx, &key, |sts| {
                let spec = sts.spec.get_or_insert_with(Default::default);
                if spec.replicas == Some(desired) {
                    return false;
                }
                spec.replicas = Some(desired);
                true
            })
            .await;
            match result {
                Ok((_, true)) => {
                    info!("Scaled StatefulSet {} to {} replica(s)", key, desired);
                    scaled = true;
                }
                Ok((_, false)) => {}
                Err(e) if e.is_not_found() => {
                    debug!("StatefulSet {} not found, skipping", key);
                }
                Err(e) => return Err(e),
            }
        }
        if scaled {
            pass.pfacts.invalidate();
        }
        Ok(Outcome::Continue)
    }
}
