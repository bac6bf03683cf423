//! Sandbox controller.
//!
//! One reconcile per sandbox ConfigMap. The ConfigMap names the VerticaDB
//! and the sandbox, and the pass runs the sandbox actor chain against pod
//! facts scoped to that sandbox.

mod restart_sandbox;
mod unsandbox;
mod verify_deployment;

pub use restart_sandbox::RestartSandboxReconciler;
pub use unsandbox::UnsandboxSubclusterReconciler;
pub use verify_deployment::VerifyDeploymentReconciler;

use crate::actor::{run_actors, ReconcileActor, ReconcilePass};
use crate::annotate_pod::AnnotateAndLabelPodReconciler;
use crate::context::OperatorContext;
use crate::error::{ControllerError, Result};
use crate::offline_upgrade::OfflineUpgradeReconciler;
use crate::podfacts::PodFacts;
use crate::restart::RestartReconciler;
use crate::scale_sts::ScaleStatefulsetReconciler;
use crate::status::StatusReconciler;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;
use verticadb_core::{meta, names, ObjectKey, Outcome};

/// VerticaDB and sandbox named by a sandbox ConfigMap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxTarget {
    pub vdb_name: String,
    pub sandbox: String,
}

/// Check the ConfigMap carries both keys and does not name the main cluster
pub fn validate_config_map_data(cm: &ConfigMap) -> Result<SandboxTarget> {
    let name = cm.name_any();
    let value = |key: &str| {
        cm.data
            .as_ref()
            .and_then(|d| d.get(key))
            .cloned()
            .unwrap_or_default()
    };
    let vdb_name = value(meta::VERTICADB_NAME_KEY);
    if vdb_name.is_empty() {
        return Err(ControllerError::invalid_config_map(
            name,
            format!("data key {} is missing", meta::VERTICADB_NAME_KEY),
        ));
    }
    let sandbox = value(meta::SANDBOX_NAME_KEY);
    if sandbox == meta::MAIN_CLUSTER {
        return Err(ControllerError::invalid_config_map(
            name,
            format!("data key {} is missing or names the main cluster", meta::SANDBOX_NAME_KEY),
        ));
    }
    Ok(SandboxTarget { vdb_name, sandbox })
}

/// Sandbox ConfigMap to reconcile when a StatefulSet changes. Only
/// StatefulSets of sandboxed subclusters map to one.
pub fn config_map_for_statefulset(sts: &StatefulSet) -> Option<ObjectKey> {
    let labels = sts.labels();
    let sandbox = labels
        .get(meta::SANDBOX_NAME_LABEL)
        .filter(|s| s.as_str() != meta::MAIN_CLUSTER)?;
    let vdb_name = labels.get(meta::INSTANCE_LABEL)?;
    let namespace = sts.namespace()?;
    Some(names::sandbox_config_map_key(&namespace, vdb_name, sandbox))
}

pub struct SandboxController {
    ctx: Arc<OperatorContext>,
    actors: Vec<Box<dyn ReconcileActor>>,
}

impl SandboxController {
    pub fn new(ctx: Arc<OperatorContext>) -> Self {
        // Order matters: later actors rely on what earlier ones established
        let actors: Vec<Box<dyn ReconcileActor>> = vec![
            Box::new(VerifyDeploymentReconciler::new(ctx.clone())),
            Box::new(UnsandboxSubclusterReconciler::new(ctx.clone())),
            Box::new(ScaleStatefulsetReconciler::new(ctx.clone())),
            Box::new(StatusReconciler::new(ctx.clone())),
            Box::new(OfflineUpgradeReconciler::new(ctx.clone())),
            Box::new(AnnotateAndLabelPodReconciler::new(ctx.clone())),
            Box::new(RestartReconciler::new(ctx.clone(), true)),
            Box::new(RestartSandboxReconciler::new(ctx.clone())),
        ];
        Self { ctx, actors }
    }

    pub fn context(&self) -> &Arc<OperatorContext> {
        &self.ctx
    }

    /// Reconcile one sandbox ConfigMap
    pub async fn reconcile(&self, cm_key: &ObjectKey) -> Result<Outcome> {
        let span = info_span!("sandbox_reconcile", id = %Uuid::new_v4(), configmap = %cm_key);
        self.reconcile_inner(cm_key).instrument(span).await
    }

    async fn reconcile_inner(&self, cm_key: &ObjectKey) -> Result<Outcome> {
        let cm = match self.ctx.client.get_config_map(cm_key).await {
            Ok(cm) => cm,
            Err(e) if e.is_not_found() => {
                debug!("ConfigMap {} not found, it was likely deleted", cm_key);
                return Ok(Outcome::Continue);
            }
            Err(e) => return Err(e),
        };
        let target = validate_config_map_data(&cm)?;

        let vdb_key = ObjectKey::new(cm_key.namespace.clone(), target.vdb_name.clone());
        let vdb = match self.ctx.client.get_vdb(&vdb_key).await {
            Ok(vdb) => vdb,
            Err(e) if e.is_not_found() => {
                info!("VerticaDB {} not found, nothing to do for sandbox {}", vdb_key, target.sandbox);
                return Ok(Outcome::Continue);
            }
            Err(e) => return Err(e),
        };

        info!("Reconciling sandbox {} of {}", target.sandbox, vdb_key);
        let pfacts = PodFacts::new(self.ctx.clone(), target.sandbox);
        let mut pass = ReconcilePass::new(vdb, pfacts);
        run_actors(&self.actors, &mut pass).await
    }
}
