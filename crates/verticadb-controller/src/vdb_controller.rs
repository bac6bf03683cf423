use crate::actor::{run_actors, ReconcileActor, ReconcilePass};
use crate::annotate_pod::AnnotateAndLabelPodReconciler;
use crate::cache::CacheManager;
use crate::context::OperatorContext;
use crate::error::Result;
use crate::podfacts::PodFacts;
use crate::restart::RestartReconciler;
use crate::scale_sts::ScaleStatefulsetReconciler;
use crate::shutdown_spec::ShutdownSpecReconciler;
use crate::status::StatusReconciler;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;
use verticadb_core::{meta, Outcome, VerticaDB};

/// Main-cluster controller for VerticaDB objects
pub struct VdbController {
    ctx: Arc<OperatorContext>,
    cache: Arc<CacheManager>,
    actors: Vec<Box<dyn ReconcileActor>>,
}

impl VdbController {
    pub fn new(ctx: Arc<OperatorContext>, cache: Arc<CacheManager>) -> Self {
        let actors: Vec<Box<dyn ReconcileActor>> = vec![
            Box::new(ShutdownSpecReconciler::new(ctx.clone())),
            Box::new(ScaleStatefulsetReconciler::new(ctx.clone())),
            Box::new(StatusReconciler::new(ctx.clone())),
            Box::new(AnnotateAndLabelPodReconciler::new(ctx.clone())),
            Box::new(RestartReconciler::new(ctx.clone(), true)),
        ];
        Self { ctx, cache, actors }
    }

    pub fn context(&self) -> &Arc<OperatorContext> {
        &self.ctx
    }

    /// Reconcile the VerticaDB `observed` refers to. The object is fetched
    /// again so the pass starts from the latest resourceVersion.
    pub async fn reconcile(&self, observed: &VerticaDB) -> Result<Outcome> {
        let key = observed.key();
        let span = info_span!("vdb_reconcile", id = %Uuid::new_v4(), vdb = %key);
        async move {
            let uid = observed.uid().unwrap_or_default();
            let vdb = match self.ctx.client.get_vdb(&key).await {
                Ok(vdb) => vdb,
                Err(e) if e.is_not_found() => {
                    debug!("VerticaDB {} not found, dropping its cache", key);
                    self.cache.destroy(&uid).await;
                    return Ok(Outcome::Continue);
                }
                Err(e) => return Err(e),
            };
            if vdb.metadata.deletion_timestamp.is_some() {
                info!("VerticaDB {} is being deleted", key);
                self.cache.destroy(&uid).await;
                return Ok(Outcome::Continue);
            }

            self.cache.init(&uid).await;
            let pfacts = PodFacts::new(self.ctx.clone(), meta::MAIN_CLUSTER);
            let mut pass = ReconcilePass::new(vdb, pfacts);
            run_actors(&self.actors, &mut pass).await
        }
        .instrument(span)
        .await
    }
}
