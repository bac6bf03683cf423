use crate::actor::{ReconcileActor, ReconcilePass};
use crate::context::OperatorContext;
use crate::error::Result;
use crate::events::EventPublisherExt;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use verticadb_core::{events, meta, Outcome};

/// Gate for the sandbox chain. Sandboxes need a vclusterops deployment on
/// a server new enough to support them.
pub struct VerifyDeploymentReconciler {
    ctx: Arc<OperatorContext>,
}

impl VerifyDeploymentReconciler {
    pub fn new(ctx: Arc<OperatorContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ReconcileActor for VerifyDeploymentReconciler {
    fn name(&self) -> &'static str {
        "VerifyDeploymentReconciler"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        if !pass.vdb.use_vclusterops() {
            info!("Sandbox {} requires vclusterops, requeueing", pass.pfacts.sandbox());
            self.ctx
                .events
                .warning(
                    &pass.vdb,
                    events::VCLUSTER_OPS_DISABLED,
                    "The sandbox controller requires a vclusterops deployment".to_string(),
                )
                .await;
            return Ok(Outcome::Requeue);
        }

        let supported = match pass.vdb.version_info() {
            Some(v) => v.is_equal_or_newer(meta::SANDBOX_SUPPORTED_MIN_VERSION)?,
            None => false,
        };
        if !supported {
            info!(
                "Server version of {} is below {}, requeueing",
                pass.vdb.key(),
                meta::SANDBOX_SUPPORTED_MIN_VERSION
            );
            self.ctx
                .events
                .warning(
                    &pass.vdb,
                    events::UNSUPPORTED_VERTICA_VERSION,
                    format!(
                        "Sandboxes require a server version of {} or newer",
                        meta::SANDBOX_SUPPORTED_MIN_VERSION
                    ),
                )
                .await;
            return Ok(Outcome::Requeue);
        }
        Ok(Outcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::podfacts::PodFacts;
    use crate::testing::{make_test_vdb, TestWorld};

    async fn run(world: &TestWorld, vdb: verticadb_core::VerticaDB) -> Outcome {
        let mut pass = ReconcilePass::new(vdb, PodFacts::new(world.ctx.clone(), "sand"));
        VerifyDeploymentReconciler::new(world.ctx.clone())
            .reconcile(&mut pass)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_supported_deployment_continues() {
        let world = TestWorld::new();
        assert_eq!(run(&world, make_test_vdb()).await, Outcome::Continue);
        assert!(world.events.reasons().is_empty());
    }

    #[tokio::test]
    async fn test_admintools_deployment_requeues() {
        let world = TestWorld::new();
        let mut vdb = make_test_vdb();
        vdb.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(meta::VCLUSTER_OPS_ANNOTATION.to_string(), "false".to_string());
        assert_eq!(run(&world, vdb).await, Outcome::Requeue);
        assert_eq!(world.events.reasons(), vec![events::VCLUSTER_OPS_DISABLED.to_string()]);
    }

    #[tokio::test]
    async fn test_old_or_missing_version_requeues() {
        let world = TestWorld::new();
        let mut vdb = make_test_vdb();
        vdb.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(meta::VERSION_ANNOTATION.to_string(), "v24.2.0".to_string());
        assert_eq!(run(&world, vdb.clone()).await, Outcome::Requeue);

        vdb.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .remove(meta::VERSION_ANNOTATION);
        assert_eq!(run(&world, vdb).await, Outcome::Requeue);
        assert_eq!(world.events.reasons().len(), 2);
    }
}
