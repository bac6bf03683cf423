use crate::actor::{ReconcileActor, ReconcilePass};
use crate::context::OperatorContext;
use crate::error::Result;
use crate::events::EventPublisherExt;
use crate::update;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use verticadb_core::{events, Outcome, VerticaDB};

/// Clears the shutdown flags of a sandbox once it has been brought back up.
///
/// The status flag is cleared first and the member subclusters' spec flags
/// second, each in its own update. A pass interrupted between the two
/// finishes the spec half on the next run, since status then already says
/// "not shut down".
pub struct RestartSandboxReconciler {
    ctx: Arc<OperatorContext>,
}

/// Clear `shutdown` on every subcluster of the sandbox
fn clear_subcluster_shutdown(vdb: &mut VerticaDB, sandbox: &str) -> bool {
    let members: Vec<String> = vdb
        .find_sandbox(sandbox)
        .map(|sb| sb.subclusters.iter().map(|sc| sc.name.clone()).collect())
        .unwrap_or_default();
    let mut changed = false;
    for sc in vdb.spec.subclusters.iter_mut() {
        if sc.shutdown && members.contains(&sc.name) {
            sc.shutdown = false;
            changed = true;
        }
    }
    changed
}

impl RestartSandboxReconciler {
    pub fn new(ctx: Arc<OperatorContext>) -> Self {
        Self { ctx }
    }

    async fn clear_spec_flags(&self, pass: &mut ReconcilePass, sandbox: &str) -> Result<()> {
        if !clear_subcluster_shutdown(&mut pass.vdb.clone(), sandbox) {
            return Ok(());
        }
        let (vdb, _) = update::update_vdb(&self.ctx, &pass.vdb.key(), |v| {
            clear_subcluster_shutdown(v, sandbox)
        })
        .await?;
        info!("Cleared shutdown on the subclusters of sandbox {}", sandbox);
        pass.vdb = vdb;
        Ok(())
    }
}

#[async_trait]
impl ReconcileActor for RestartSandboxReconciler {
    fn name(&self) -> &'static str {
        "RestartSandboxReconciler"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        let sandbox = pass.pfacts.sandbox().to_string();
        let Some(sb) = pass.vdb.find_sandbox(&sandbox) else {
            return Ok(Outcome::Continue);
        };
        if sb.shutdown {
            return Ok(Outcome::Continue);
        }
        let status_shutdown = pass
            .vdb
            .find_sandbox_status(&sandbox)
            .is_some_and(|s| s.shutdown);
        if !status_shutdown {
            self.clear_spec_flags(pass, &sandbox).await?;
            return Ok(Outcome::Continue);
        }

        pass.pfacts.collect(&pass.vdb).await?;
        if pass.pfacts.get_up_node_and_not_read_only_count() == 0 {
            info!("Sandbox {} has no writable node up yet, requeueing", sandbox);
            return Ok(Outcome::Requeue);
        }

        let (vdb, _) = update::update_vdb_status(&self.ctx, &pass.vdb.key(), |s| {
            let Some(sb) = s.sandboxes.iter_mut().find(|sb| sb.name == sandbox) else {
                return false;
            };
            let changed = sb.shutdown;
            sb.shutdown = false;
            changed
        })
        .await?;
        pass.vdb = vdb;
        self.clear_spec_flags(pass, &sandbox).await?;
        self.ctx
            .events
            .normal(
                &pass.vdb,
                events::SANDBOX_RESTARTED,
                format!("Sandbox {} is running again", sandbox),
            )
            .await;
        Ok(Outcome::Continue)
    }
}
