//! `ObjectClient` and `PodRunner` backed by a live Kubernetes API server

use crate::error::{ControllerError, Result};
use crate::traits::{ObjectClient, PodRunner};
use crate::types::{ExecOutput, ServerVersion};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{AttachParams, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tokio::io::AsyncReadExt;
use tracing::debug;
use verticadb_core::{ObjectKey, VerticaDB};

/// Map API status codes onto the error kinds callers branch on
fn map_err(kind: &str, key: &ObjectKey, err: kube::Error) -> ControllerError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => ControllerError::not_found(kind, key.to_string()),
        kube::Error::Api(resp) if resp.code == 409 => ControllerError::conflict(kind, key.to_string()),
        _ => ControllerError::KubeError(err),
    }
}

fn key_of<K: ResourceExt>(obj: &K) -> ObjectKey {
    ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any())
}

#[derive(Clone)]
pub struct KubeObjectClient {
    client: Client,
}

impl KubeObjectClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, kind: &str, key: &ObjectKey) -> Result<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| map_err(kind, key, e))
    }

    async fn replace<K>(&self, kind: &str, obj: &K) -> Result<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + serde::Serialize
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let key = key_of(obj);
        self.api::<K>(&key.namespace)
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_err(kind, &key, e))
    }

    async fn delete<K>(&self, kind: &str, key: &ObjectKey) -> Result<()>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        match self
            .api::<K>(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                debug!("Deleted {} {}", kind, key);
                Ok(())
            }
            Err(e) => match map_err(kind, key, e) {
                ControllerError::NotFound { .. } => Ok(()),
                other => Err(other),
            },
        }
    }
}

#[async_trait]
impl ObjectClient for KubeObjectClient {
    async fn get_vdb(&self, key: &ObjectKey) -> Result<VerticaDB> {
        self.get("VerticaDB", key).await
    }

    async fn update_vdb(&self, vdb: &VerticaDB) -> Result<VerticaDB> {
        self.replace("VerticaDB", vdb).await
    }

    async fn update_vdb_status(&self, vdb: &VerticaDB) -> Result<VerticaDB> {
        let key = key_of(vdb);
        let data = serde_json::to_vec(vdb).map_err(|e| {
            ControllerError::internal_error(format!("Failed to serialize VerticaDB {}: {}", key, e))
        })?;
        self.api::<VerticaDB>(&key.namespace)
            .replace_subresource("status", &key.name, &PostParams::default(), data)
            .await
            .map_err(|e| map_err("VerticaDB", &key, e))
    }

    async fn get_config_map(&self, key: &ObjectKey) -> Result<ConfigMap> {
        self.get("ConfigMap", key).await
    }

    async fn delete_config_map(&self, key: &ObjectKey) -> Result<()> {
        self.delete::<ConfigMap>("ConfigMap", key).await
    }

    async fn patch_config_map_annotations(
        &self,
        key: &ObjectKey,
        annotations: &BTreeMap<String, Option<String>>,
    ) -> Result<ConfigMap> {
        let patch = json!({ "metadata": { "annotations": annotations } });
        self.api::<ConfigMap>(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err("ConfigMap", key, e))
    }

    async fn get_statefulset(&self, key: &ObjectKey) -> Result<StatefulSet> {
        self.get("StatefulSet", key).await
    }

    async fn update_statefulset(&self, sts: &StatefulSet) -> Result<StatefulSet> {
        self.replace("StatefulSet", sts).await
    }

    async fn get_pod(&self, key: &ObjectKey) -> Result<Pod> {
        self.get("Pod", key).await
    }

    async fn update_pod(&self, pod: &Pod) -> Result<Pod> {
        self.replace("Pod", pod).await
    }

    async fn delete_pod(&self, key: &ObjectKey) -> Result<()> {
        self.delete::<Pod>("Pod", key).await
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret> {
        self.get("Secret", key).await
    }

    async fn server_version(&self) -> Result<ServerVersion> {
        let info = self.client.apiserver_version().await?;
        Ok(ServerVersion {
            git_version: info.git_version,
            git_commit: info.git_commit,
            build_date: info.build_date,
        })
    }
}

/// Runs commands through the pods/exec websocket
#[derive(Clone)]
pub struct KubePodRunner {
    client: Client,
}

impl KubePodRunner {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodRunner for KubePodRunner {
    async fn exec_in_pod(&self, pod: &ObjectKey, container: &str, command: &[String]) -> Result<ExecOutput> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);
        let mut attached = api
            .exec(&pod.name, command.to_vec(), &params)
            .await
            .map_err(|e| map_err("Pod", pod, e))?;

        let (mut out_buf, mut err_buf) = (String::new(), String::new());
        let stdout = attached.stdout();
        let stderr = attached.stderr();
        // Drain both streams concurrently
        let (res_out, res_err) = tokio::join!(
            async {
                match stdout {
                    Some(mut s) => s.read_to_string(&mut out_buf).await.map(|_| ()),
                    None => Ok(()),
                }
            },
            async {
                match stderr {
                    Some(mut s) => s.read_to_string(&mut err_buf).await.map(|_| ()),
                    None => Ok(()),
                }
            },
        );
        res_out
            .and(res_err)
            .map_err(|e| ControllerError::exec(pod.to_string(), container, e.to_string()))?;
        let out = ExecOutput {
            stdout: out_buf,
            stderr: err_buf,
        };

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        attached
            .join()
            .await
            .map_err(|e| ControllerError::exec(pod.to_string(), container, e.to_string()))?;

        match status {
            Some(s) if s.status.as_deref() != Some("Success") => Err(ControllerError::exec(
                pod.to_string(),
                container,
                format!(
                    "{}: {}",
                    s.message.unwrap_or_else(|| "command failed".to_string()),
                    out.stderr.trim()
                ),
            )),
            _ => Ok(out),
        }
    }
}
