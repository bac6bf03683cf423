use crate::actor::{ReconcileActor, ReconcilePass};
use crate::context::OperatorContext;
use crate::error::Result;
use crate::update;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use verticadb_core::{meta, ObjectKey, Outcome};

/// Stamps system information onto every pod so the downward API can feed
/// it to the server's data collector tables
pub struct AnnotateAndLabelPodReconciler {
    ctx: Arc<OperatorContext>,
}

impl AnnotateAndLabelPodReconciler {
    pub fn new(ctx: Arc<OperatorContext>) -> Self {
        Self { ctx }
    }

    async fn generate_annotations(&self) -> Result<BTreeMap<String, String>> {
        let ver = self.ctx.client.server_version().await?;
        debug!(
            "Kubernetes server version {} (commit {}, built {})",
            ver.git_version, ver.git_commit, ver.build_date
        );
        Ok(BTreeMap::from([
            (meta::KUBERNETES_VERSION_ANNOTATION.to_string(), ver.git_version),
            (meta::KUBERNETES_GIT_COMMIT_ANNOTATION.to_string(), ver.git_commit),
            (meta::KUBERNETES_BUILD_DATE_ANNOTATION.to_string(), ver.build_date),
        ]))
    }

    /// Returns true if the pod was written
    async fn apply(
        &self,
        name: &ObjectKey,
        annotations: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let result = update::update_pod(&self.ctx, name, |pod| {
            let mut changed = false;
            let current = pod.metadata.annotations.get_or_insert_with(BTreeMap::new);
            for (k, v) in annotations {
                if current.get(k) != Some(v) {
                    current.insert(k.clone(), v.clone());
                    changed = true;
                }
            }
            let current = pod.metadata.labels.get_or_insert_with(BTreeMap::new);
            for (k, v) in labels {
                if current.get(k) != Some(v) {
                    current.insert(k.clone(), v.clone());
                    changed = true;
                }
            }
            changed
        })
        .await;
        match result {
            Ok((_, changed)) => Ok(changed),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ReconcileActor for AnnotateAndLabelPodReconciler {
    fn name(&self) -> &'static str {
        "AnnotateAndLabelPodReconciler"
    }

    async fn reconcile(&self, pass: &mut ReconcilePass) -> Result<Outcome> {
        pass.pfacts.collect(&pass.vdb).await?;
        let annotations = self.generate_annotations().await?;
        let labels = BTreeMap::from([(
            meta::OPERATOR_VERSION_LABEL.to_string(),
            self.ctx.config.operator_version.clone(),
        )]);

        let existing: Vec<ObjectKey> = pass
            .pfacts
            .iter()
            .filter(|pf| pf.exists)
            .map(|pf| pf.name.clone())
            .collect();
        for name in existing {
            if self.apply(&name, &annotations, &labels).await? {
                info!("Annotated pod {}", name);
            }
            // Saves invalidating the whole snapshot
            pass.pfacts.mark_dc_table_annotations(&name);
        }
        Ok(Outcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::podfacts::PodFacts;
    use crate::testing::{make_test_vdb, PodState, TestWorld};
    use kube::ResourceExt;
    use verticadb_core::names;

    #[tokio::test]
    async fn test_pods_get_annotations_and_label() {
        let world = TestWorld::new();
        let vdb = make_test_vdb();
        world.add_vdb(vdb.clone()).await;
        let bare = PodState {
            dc_annotations: false,
            ..PodState::down()
        };
        world
            .add_pods(&vdb, "main", &[PodState::up(), bare, PodState::not_running()])
            .await;

        let mut pass = ReconcilePass::new(vdb.clone(), PodFacts::new(world.ctx.clone(), ""));
        let actor = AnnotateAndLabelPodReconciler::new(world.ctx.clone());
        assert_eq!(actor.reconcile(&mut pass).await.unwrap(), Outcome::Continue);

        let key = names::pod_name(&vdb, &vdb.spec.subclusters[0], 1);
        let pod = world.client.pod(&key).await.unwrap();
        assert_eq!(
            pod.annotations().get(meta::KUBERNETES_VERSION_ANNOTATION).map(String::as_str),
            Some("v1.31.0")
        );
        assert_eq!(
            pod.labels().get(meta::OPERATOR_VERSION_LABEL),
            Some(&world.ctx.config.operator_version)
        );
        assert!(pass.pfacts.get(&key).unwrap().has_dc_table_annotations);

        // Second pass has nothing to write
        let writes = world.client.write_count().await;
        actor.reconcile(&mut pass).await.unwrap();
        assert_eq!(world.client.write_count().await, writes);
    }
}
