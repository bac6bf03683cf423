//! Fetch, mutate, write-if-changed, retried on conflict.
//!
//! Every write to a shared object goes through here. The mutation is a pure
//! function of the freshly fetched object and returns true when it changed
//! something; unchanged objects are never written.

use crate::config::RetryPolicy;
use crate::context::OperatorContext;
use crate::error::{ControllerError, Result};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use std::future::Future;
use tracing::debug;
use verticadb_core::{ObjectKey, VerticaDB, VerticaDbStatus};

/// Run `op` until it succeeds, fails with something other than a conflict,
/// or the policy runs out of steps
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    kind: &str,
    key: &ObjectKey,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let steps = policy.steps.max(1);
    for attempt in 0..steps {
        match op().await {
            Err(e) if e.is_conflict() => {
                debug!("Conflict updating {} {} (attempt {})", kind, key, attempt + 1);
                if attempt + 1 < steps {
                    tokio::time::sleep(policy.delay(attempt)).await;
                }
            }
            other => return other,
        }
    }
    Err(ControllerError::retries_exhausted(kind, key.to_string(), steps))
}

/// Update the VerticaDB's metadata and spec. Returns the stored object and
/// whether a write happened.
pub async fn update_vdb<F>(ctx: &OperatorContext, key: &ObjectKey, mutate: F) -> Result<(VerticaDB, bool)>
where
    F: Fn(&mut VerticaDB) -> bool,
{
    let client = &ctx.client;
    let mutate = &mutate;
    retry_on_conflict(&ctx.config.conflict_retry, "VerticaDB", key, move || async move {
        let mut vdb = client.get_vdb(key).await?;
        if !mutate(&mut vdb) {
            return Ok((vdb, false));
        }
        Ok((client.update_vdb(&vdb).await?, true))
    })
    .await
}

/// Update the VerticaDB status subresource
pub async fn update_vdb_status<F>(
    ctx: &OperatorContext,
    key: &ObjectKey,
    mutate: F,
) -> Result<(VerticaDB, bool)>
where
    F: Fn(&mut VerticaDbStatus) -> bool,
{
    let client = &ctx.client;
    let mutate = &mutate;
    retry_on_conflict(&ctx.config.conflict_retry, "VerticaDB", key, move || async move {
        let mut vdb = client.get_vdb(key).await?;
        if !mutate(vdb.status.get_or_insert_with(VerticaDbStatus::default)) {
            return Ok((vdb, false));
        }
        Ok((client.update_vdb_status(&vdb).await?, true))
    })
    .await
}

pub async fn update_statefulset<F>(
    ctx: &OperatorContext,
    key: &ObjectKey,
    mutate: F,
) -> Result<(StatefulSet, bool)>
where
    F: Fn(&mut StatefulSet) -> bool,
{
    let client = &ctx.client;
    let mutate = &mutate;
    retry_on_conflict(&ctx.config.conflict_retry, "StatefulSet", key, move || async move {
        let mut sts = client.get_statefulset(key).await?;
        if !mutate(&mut sts) {
            return Ok((sts, false));
        }
        Ok((client.update_statefulset(&sts).await?, true))
    })
    .await
}

pub async fn update_pod<F>(ctx: &OperatorContext, key: &ObjectKey, mutate: F) -> Result<(Pod, bool)>
where
    F: Fn(&mut Pod) -> bool,
{
    let client = &ctx.client;
    let mutate = &mutate;
    retry_on_conflict(&ctx.config.conflict_retry, "Pod", key, move || async move {
        let mut pod = client.get_pod(key).await?;
        if !mutate(&mut pod) {
            return Ok((pod, false));
        }
        Ok((client.update_pod(&pod).await?, true))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_test_vdb, TestWorld};
    use verticadb_core::crd::conditions;

    #[tokio::test]
    async fn test_update_retries_past_conflicts() {
        let world = TestWorld::new();
        let vdb = make_test_vdb();
        let key = vdb.key();
        world.add_vdb(vdb).await;
        world.client.inject_conflicts(2).await;

        let (updated, changed) = update_vdb(&world.ctx, &key, |v| {
            v.spec.subclusters[0].shutdown = true;
            true
        })
        .await
        .unwrap();
        assert!(changed);
        assert!(updated.spec.subclusters[0].shutdown);
        assert_eq!(world.client.write_count().await, 1);
    }

    #[tokio::test]
    async fn test_update_gives_up_after_policy_steps() {
        let world = TestWorld::new();
        let vdb = make_test_vdb();
        let key = vdb.key();
        world.add_vdb(vdb).await;
        world.client.inject_conflicts(50).await;

        let err = update_vdb_status(&world.ctx, &key, |s| {
            s.set_condition(conditions::UPGRADE_IN_PROGRESS, true, "Test")
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::RetriesExhausted { attempts: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_unchanged_object_is_not_written() {
        let world = TestWorld::new();
        let vdb = make_test_vdb();
        let key = vdb.key();
        world.add_vdb(vdb).await;

        let (_, changed) = update_vdb_status(&world.ctx, &key, |s| {
            s.set_condition(conditions::DB_INITIALIZED, true, "Initialized")
        })
        .await
        .unwrap();
        assert!(!changed);
        assert_eq!(world.client.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_status_update_keeps_spec() {
        let world = TestWorld::new();
        let vdb = make_test_vdb();
        let key = vdb.key();
        world.add_vdb(vdb).await;

        let (updated, changed) = update_vdb_status(&world.ctx, &key, |s| {
            s.up_node_count = 3;
            true
        })
        .await
        .unwrap();
        assert!(changed);
        assert_eq!(updated.status.unwrap().up_node_count, 3);
        assert_eq!(updated.spec.subclusters.len(), 1);
    }
}
