use crate::error::{ControllerError, Result};
use crate::traits::{Dispatcher, ObjectClient, PodRunner};
use crate::types::*;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use verticadb_core::{ObjectKey, Outcome, VerticaDB};

fn key_of<K: kube::Resource>(obj: &K) -> ObjectKey {
    ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Versioned in-memory object store
#[derive(Default)]
struct MockStore {
    vdbs: HashMap<ObjectKey, VerticaDB>,
    config_maps: HashMap<ObjectKey, ConfigMap>,
    statefulsets: HashMap<ObjectKey, StatefulSet>,
    pods: HashMap<ObjectKey, Pod>,
    secrets: HashMap<ObjectKey, Secret>,
    next_version: u64,
    /// Number of upcoming writes that fail with a conflict
    pending_conflicts: u32,
    writes: u32,
}

impl MockStore {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    /// Validate the caller's resourceVersion against the stored object
    fn check_write(&mut self, kind: &str, key: &ObjectKey, stored: Option<&str>, given: Option<&str>) -> Result<()> {
        if self.pending_conflicts > 0 {
            self.pending_conflicts -= 1;
            debug!("Mock: injected conflict on {} {}", kind, key);
            return Err(ControllerError::conflict(kind, key.to_string()));
        }
        match (stored, given) {
            (None, _) => Err(ControllerError::not_found(kind, key.to_string())),
            (Some(s), Some(g)) if s != g => Err(ControllerError::conflict(kind, key.to_string())),
            _ => {
                self.writes += 1;
                Ok(())
            }
        }
    }
}

/// Mock Kubernetes client for tests
///
/// Every write compares resourceVersion like the API server does, so the
/// update-on-conflict paths are exercised for real.
#[derive(Clone, Default)]
pub struct MockObjectClient {
    store: Arc<RwLock<MockStore>>,
}

impl MockObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_vdb(&self, mut vdb: VerticaDB) {
        let mut store = self.store.write().await;
        vdb.metadata.resource_version = Some(store.bump());
        store.vdbs.insert(vdb.key(), vdb);
    }

    pub async fn insert_config_map(&self, mut cm: ConfigMap) {
        let mut store = self.store.write().await;
        cm.metadata.resource_version = Some(store.bump());
        store.config_maps.insert(key_of(&cm), cm);
    }

    pub async fn insert_statefulset(&self, mut sts: StatefulSet) {
        let mut store = self.store.write().await;
        sts.metadata.resource_version = Some(store.bump());
        store.statefulsets.insert(key_of(&sts), sts);
    }

    pub async fn insert_pod(&self, mut pod: Pod) {
        let mut store = self.store.write().await;
        pod.metadata.resource_version = Some(store.bump());
        store.pods.insert(key_of(&pod), pod);
    }

    pub async fn insert_secret(&self, secret: Secret) {
        let mut store = self.store.write().await;
        store.secrets.insert(key_of(&secret), secret);
    }

    pub async fn vdb(&self, key: &ObjectKey) -> Option<VerticaDB> {
        self.store.read().await.vdbs.get(key).cloned()
    }

    pub async fn config_map(&self, key: &ObjectKey) -> Option<ConfigMap> {
        self.store.read().await.config_maps.get(key).cloned()
    }

    pub async fn statefulset(&self, key: &ObjectKey) -> Option<StatefulSet> {
        self.store.read().await.statefulsets.get(key).cloned()
    }

    pub async fn pod(&self, key: &ObjectKey) -> Option<Pod> {
        self.store.read().await.pods.get(key).cloned()
    }

    /// Make the next `n` writes fail with a conflict
    pub async fn inject_conflicts(&self, n: u32) {
        self.store.write().await.pending_conflicts = n;
    }

    /// Number of successful writes so far
    pub async fn write_count(&self) -> u32 {
        self.store.read().await.writes
    }
}

#[async_trait]
impl ObjectClient for MockObjectClient {
    async fn get_vdb(&self, key: &ObjectKey) -> Result<VerticaDB> {
        self.vdb(key)
            .await
            .ok_or_else(|| ControllerError::not_found("VerticaDB", key.to_string()))
    }

    async fn update_vdb(&self, vdb: &VerticaDB) -> Result<VerticaDB> {
        let key = vdb.key();
        let mut store = self.store.write().await;
        let stored = store.vdbs.get(&key).cloned();
        store.check_write(
            "VerticaDB",
            &key,
            stored.as_ref().and_then(|v| v.metadata.resource_version.as_deref()),
            vdb.metadata.resource_version.as_deref(),
        )?;
        let mut updated = vdb.clone();
        // The main resource endpoint ignores status
        updated.status = stored.and_then(|v| v.status);
        updated.metadata.resource_version = Some(store.bump());
        store.vdbs.insert(key.clone(), updated.clone());
        debug!("Mock: VerticaDB updated: {}", key);
        Ok(updated)
    }

    async fn update_vdb_status(&self, vdb: &VerticaDB) -> Result<VerticaDB> {
        let key = vdb.key();
        let mut store = self.store.write().await;
        let stored = store
            .vdbs
            .get(&key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("VerticaDB", key.to_string()))?;
        store.check_write(
            "VerticaDB",
            &key,
            stored.metadata.resource_version.as_deref(),
            vdb.metadata.resource_version.as_deref(),
        )?;
        let mut updated = stored;
        updated.status = vdb.status.clone();
        updated.metadata.resource_version = Some(store.bump());
        store.vdbs.insert(key.clone(), updated.clone());
        debug!("Mock: VerticaDB status updated: {}", key);
        Ok(updated)
    }

    async fn get_config_map(&self, key: &ObjectKey) -> Result<ConfigMap> {
        self.config_map(key)
            .await
            .ok_or_else(|| ControllerError::not_found("ConfigMap", key.to_string()))
    }

    async fn delete_config_map(&self, key: &ObjectKey) -> Result<()> {
        let mut store = self.store.write().await;
        if store.config_maps.remove(key).is_some() {
            store.writes += 1;
            debug!("Mock: ConfigMap deleted: {}", key);
        }
        Ok(())
    }

    async fn patch_config_map_annotations(
        &self,
        key: &ObjectKey,
        annotations: &BTreeMap<String, Option<String>>,
    ) -> Result<ConfigMap> {
        let mut store = self.store.write().await;
        let version = store.bump();
        let cm = store
            .config_maps
            .get_mut(key)
            .ok_or_else(|| ControllerError::not_found("ConfigMap", key.to_string()))?;
        let current = cm.metadata.annotations.get_or_insert_with(BTreeMap::new);
        for (k, v) in annotations {
            match v {
                Some(v) => {
                    current.insert(k.clone(), v.clone());
                }
                None => {
                    current.remove(k);
                }
            }
        }
        cm.metadata.resource_version = Some(version);
        let patched = cm.clone();
        store.writes += 1;
        debug!("Mock: ConfigMap annotations patched: {}", key);
        Ok(patched)
    }

    async fn get_statefulset(&self, key: &ObjectKey) -> Result<StatefulSet> {
        self.statefulset(key)
            .await
            .ok_or_else(|| ControllerError::not_found("StatefulSet", key.to_string()))
    }

    async fn update_statefulset(&self, sts: &StatefulSet) -> Result<StatefulSet> {
        let key = key_of(sts);
        let mut store = self.store.write().await;
        let stored = store
            .statefulsets
            .get(&key)
            .and_then(|s| s.metadata.resource_version.clone());
        let exists = store.statefulsets.contains_key(&key);
        store.check_write(
            "StatefulSet",
            &key,
            if exists { Some(stored.as_deref().unwrap_or("")) } else { None },
            sts.metadata.resource_version.as_deref(),
        )?;
        let mut updated = sts.clone();
        updated.metadata.resource_version = Some(store.bump());
        store.statefulsets.insert(key.clone(), updated.clone());
        debug!("Mock: StatefulSet updated: {}", key);
        Ok(updated)
    }

    async fn get_pod(&self, key: &ObjectKey) -> Result<Pod> {
        self.pod(key)
            .await
            .ok_or_else(|| ControllerError::not_found("Pod", key.to_string()))
    }

    async fn update_pod(&self, pod: &Pod) -> Result<Pod> {
        let key = key_of(pod);
        let mut store = self.store.write().await;
        let stored = store
            .pods
            .get(&key)
            .and_then(|p| p.metadata.resource_version.clone());
        let exists = store.pods.contains_key(&key);
        store.check_write(
            "Pod",
            &key,
            if exists { Some(stored.as_deref().unwrap_or("")) } else { None },
            pod.metadata.resource_version.as_deref(),
        )?;
        let mut updated = pod.clone();
        updated.metadata.resource_version = Some(store.bump());
        store.pods.insert(key.clone(), updated.clone());
        debug!("Mock: Pod updated: {}", key);
        Ok(updated)
    }

    async fn delete_pod(&self, key: &ObjectKey) -> Result<()> {
        let mut store = self.store.write().await;
        if store.pods.remove(key).is_some() {
            store.writes += 1;
            debug!("Mock: Pod deleted: {}", key);
        }
        Ok(())
    }

    async fn get_secret(&self, key: &ObjectKey) -> Result<Secret> {
        self.store
            .read()
            .await
            .secrets
            .get(key)
            .cloned()
            .ok_or_else(|| ControllerError::not_found("Secret", key.to_string()))
    }

    async fn server_version(&self) -> Result<ServerVersion> {
        Ok(ServerVersion {
            git_version: "v1.31.0".to_string(),
            git_commit: "abc123".to_string(),
            build_date: "2024-08-13T07:28:49Z".to_string(),
        })
    }
}

/// A command run through `MockPodRunner`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub pod: ObjectKey,
    pub container: String,
    pub command: Vec<String>,
}

impl ExecCall {
    pub fn joined(&self) -> String {
        self.command.join(" ")
    }
}

#[derive(Default)]
struct MockRunnerState {
    /// (pod, needle, stdout). First rule whose needle occurs in the command wins.
    rules: Vec<(ObjectKey, String, String)>,
    failing_pods: HashSet<ObjectKey>,
    calls: Vec<ExecCall>,
}

/// Mock pod exec with scripted output
#[derive(Clone, Default)]
pub struct MockPodRunner {
    state: Arc<RwLock<MockRunnerState>>,
}

impl MockPodRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `stdout` when a command containing `needle` runs in `pod`
    pub async fn set_output(&self, pod: &ObjectKey, needle: &str, stdout: impl Into<String>) {
        let mut state = self.state.write().await;
        state
            .rules
            .retain(|(p, n, _)| !(p == pod && n == needle));
        state
            .rules
            .push((pod.clone(), needle.to_string(), stdout.into()));
    }

    /// Make every exec in `pod` fail
    pub async fn fail_pod(&self, pod: &ObjectKey) {
        self.state.write().await.failing_pods.insert(pod.clone());
    }

    pub async fn calls(&self) -> Vec<ExecCall> {
        self.state.read().await.calls.clone()
    }

    /// Calls whose command line contains `needle`
    pub async fn calls_matching(&self, needle: &str) -> Vec<ExecCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| c.joined().contains(needle))
            .collect()
    }
}

#[async_trait]
impl PodRunner for MockPodRunner {
    async fn exec_in_pod(
        &self,
        pod: &ObjectKey,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        let mut state = self.state.write().await;
        let call = ExecCall {
            pod: pod.clone(),
            container: container.to_string(),
            command: command.to_vec(),
        };
        let joined = call.joined();
        state.calls.push(call);
        if state.failing_pods.contains(pod) {
            return Err(ControllerError::exec(pod.to_string(), container, "injected failure"));
        }
        let stdout = state
            .rules
            .iter()
            .find(|(p, needle, _)| p == pod && joined.contains(needle.as_str()))
            .map(|(_, _, out)| out.clone())
            .unwrap_or_default();
        debug!("Mock: exec in {} ({}): {} bytes", pod, container, stdout.len());
        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

/// A call received by `MockDispatcher`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchCall {
    RestartNode {
        initiator: String,
        hosts: Vec<(String, String)>,
    },
    ReIp {
        initiator: String,
        hosts: Vec<ReIpHost>,
    },
    StartDb {
        initiator: String,
        hosts: Vec<String>,
        sandbox: String,
    },
    StopDb {
        initiator: String,
        sandbox: String,
    },
    FetchNodeState {
        initiator: String,
    },
    FetchNodeDetails {
        host: String,
        vnode: String,
    },
    Unsandbox(UnsandboxRequest),
}

impl DispatchCall {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::RestartNode { .. } => "RestartNode",
            Self::ReIp { .. } => "ReIP",
            Self::StartDb { .. } => "StartDB",
            Self::StopDb { .. } => "StopDB",
            Self::FetchNodeState { .. } => "FetchNodeState",
            Self::FetchNodeDetails { .. } => "FetchNodeDetails",
            Self::Unsandbox(_) => "UnsandboxSubcluster",
        }
    }
}

#[derive(Default)]
struct MockDispatcherState {
    calls: Vec<DispatchCall>,
    failing_verbs: HashSet<String>,
    failing_subclusters: HashSet<String>,
    node_state: HashMap<String, NodeState>,
    node_details: HashMap<String, NodeDetails>,
}

/// Mock dispatcher recording every call
///
/// A successful unsandbox moves the subcluster's nodes to the main cluster
/// in the node details it serves afterwards.
#[derive(Clone, Default)]
pub struct MockDispatcher {
    state: Arc<RwLock<MockDispatcherState>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<DispatchCall> {
        self.state.read().await.calls.clone()
    }

    /// Verbs called, in order
    pub async fn verbs(&self) -> Vec<&'static str> {
        self.calls().await.iter().map(DispatchCall::verb).collect()
    }

    pub async fn count(&self, verb: &str) -> usize {
        self.verbs().await.into_iter().filter(|v| *v == verb).count()
    }

    pub async fn fail_verb(&self, verb: &str) {
        self.state.write().await.failing_verbs.insert(verb.to_string());
    }

    /// Make unsandboxing this subcluster fail
    pub async fn fail_subcluster(&self, subcluster: &str) {
        self.state
            .write()
            .await
            .failing_subclusters
            .insert(subcluster.to_string());
    }

    pub async fn set_node_state(&self, vnode: &str, state: NodeState) {
        self.state
            .write()
            .await
            .node_state
            .insert(vnode.to_string(), state);
    }

    pub async fn set_node_details(&self, vnode: &str, details: NodeDetails) {
        self.state
            .write()
            .await
            .node_details
            .insert(vnode.to_string(), details);
    }

    async fn record(&self, call: DispatchCall) -> Result<()> {
        let verb = call.verb();
        let mut state = self.state.write().await;
        debug!("Mock: dispatch {}", verb);
        state.calls.push(call);
        if state.failing_verbs.contains(verb) {
            return Err(ControllerError::dispatch(verb, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn restart_node(
        &self,
        _db: &DatabaseTarget,
        initiator_ip: &str,
        hosts: &[(String, String)],
    ) -> Result<Outcome> {
        self.record(DispatchCall::RestartNode {
            initiator: initiator_ip.to_string(),
            hosts: hosts.to_vec(),
        })
        .await?;
        Ok(Outcome::Continue)
    }

    async fn re_ip(
        &self,
        _db: &DatabaseTarget,
        initiator_ip: &str,
        hosts: &[ReIpHost],
        _communal: Option<&CommunalParams>,
    ) -> Result<Outcome> {
        self.record(DispatchCall::ReIp {
            initiator: initiator_ip.to_string(),
            hosts: hosts.to_vec(),
        })
        .await?;
        Ok(Outcome::Continue)
    }

    async fn start_db(
        &self,
        _db: &DatabaseTarget,
        initiator_ip: &str,
        host_ips: &[String],
        _communal: Option<&CommunalParams>,
        sandbox: &str,
    ) -> Result<Outcome> {
        self.record(DispatchCall::StartDb {
            initiator: initiator_ip.to_string(),
            hosts: host_ips.to_vec(),
            sandbox: sandbox.to_string(),
        })
        .await?;
        Ok(Outcome::Continue)
    }

    async fn stop_db(
        &self,
        _db: &DatabaseTarget,
        initiator_ip: &str,
        sandbox: &str,
    ) -> Result<Outcome> {
        self.record(DispatchCall::StopDb {
            initiator: initiator_ip.to_string(),
            sandbox: sandbox.to_string(),
        })
        .await?;
        Ok(Outcome::Continue)
    }

    async fn fetch_node_state(
        &self,
        _db: &DatabaseTarget,
        initiator_ip: &str,
        _host_ips: &[String],
    ) -> Result<HashMap<String, NodeState>> {
        self.record(DispatchCall::FetchNodeState {
            initiator: initiator_ip.to_string(),
        })
        .await?;
        Ok(self.state.read().await.node_state.clone())
    }

    async fn fetch_node_details(
        &self,
        _db: &DatabaseTarget,
        host_ip: &str,
        vnode: &str,
    ) -> Result<NodeDetails> {
        self.record(DispatchCall::FetchNodeDetails {
            host: host_ip.to_string(),
            vnode: vnode.to_string(),
        })
        .await?;
        Ok(self
            .state
            .read()
            .await
            .node_details
            .get(vnode)
            .cloned()
            .unwrap_or_default())
    }

    async fn unsandbox_subcluster(
        &self,
        _db: &DatabaseTarget,
        request: &UnsandboxRequest,
    ) -> Result<Outcome> {
        self.record(DispatchCall::Unsandbox(request.clone())).await?;
        let mut state = self.state.write().await;
        if state.failing_subclusters.contains(&request.subcluster) {
            return Err(ControllerError::dispatch(
                "UnsandboxSubcluster",
                format!("injected failure for subcluster {}", request.subcluster),
            ));
        }
        for vnode in request.node_address_map.keys() {
            state
                .node_details
                .entry(vnode.clone())
                .or_default()
                .sandbox
                .clear();
        }
        Ok(Outcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn make_test_cm() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("vertdb-sand".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let client = MockObjectClient::new();
        let spec = verticadb_core::from_yaml("image: vertica:24.3.0").unwrap();
        let mut vdb = VerticaDB::new("vertdb", spec);
        vdb.metadata.namespace = Some("default".to_string());
        client.insert_vdb(vdb).await;

        let key = ObjectKey::new("default", "vertdb");
        let fetched = client.get_vdb(&key).await.unwrap();
        client.update_vdb(&fetched).await.unwrap();

        // Second write with the old version must conflict
        let err = client.update_vdb(&fetched).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let client = MockObjectClient::new();
        client.insert_config_map(make_test_cm()).await;
        let key = ObjectKey::new("default", "vertdb-sand");
        let sts = StatefulSet {
            metadata: ObjectMeta {
                name: Some("vertdb-main".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        client.insert_statefulset(sts).await;
        let sts_key = ObjectKey::new("default", "vertdb-main");

        client.inject_conflicts(1).await;
        let sts = client.get_statefulset(&sts_key).await.unwrap();
        assert!(client.update_statefulset(&sts).await.unwrap_err().is_conflict());
        assert!(client.update_statefulset(&sts).await.is_ok());

        client.delete_config_map(&key).await.unwrap();
        // Deleting again is not an error
        client.delete_config_map(&key).await.unwrap();
        assert!(client.get_config_map(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_patch_annotations_removes_none() {
        let client = MockObjectClient::new();
        let mut cm = make_test_cm();
        cm.metadata.annotations = Some(BTreeMap::from([("a".to_string(), "1".to_string())]));
        client.insert_config_map(cm).await;
        let key = ObjectKey::new("default", "vertdb-sand");

        let patch = BTreeMap::from([
            ("a".to_string(), None),
            ("b".to_string(), Some("2".to_string())),
        ]);
        let cm = client.patch_config_map_annotations(&key, &patch).await.unwrap();
        let ann = cm.annotations();
        assert!(!ann.contains_key("a"));
        assert_eq!(ann.get("b").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_pod_runner_rules_and_failures() {
        let runner = MockPodRunner::new();
        let pod = ObjectKey::new("default", "vertdb-main-0");
        runner.set_output(&pod, "pgrep", "Killing process 12").await;

        let cmd = vec!["bash".to_string(), "-c".to_string(), "pgrep spread".to_string()];
        let out = runner.exec_in_pod(&pod, "server", &cmd).await.unwrap();
        assert_eq!(out.stdout, "Killing process 12");

        let other = vec!["ls".to_string()];
        assert_eq!(runner.exec_in_pod(&pod, "server", &other).await.unwrap().stdout, "");

        runner.fail_pod(&pod).await;
        let err = runner.exec_in_pod(&pod, "server", &other).await.unwrap_err();
        assert!(matches!(err, ControllerError::Exec { .. }));
        assert_eq!(runner.calls_matching("pgrep").await.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatcher_unsandbox_moves_nodes_to_main() {
        let dispatcher = MockDispatcher::new();
        dispatcher
            .set_node_details(
                "v_vertdb_node0004",
                NodeDetails {
                    sandbox: "sand".to_string(),
                    ..Default::default()
                },
            )
            .await;
        let db = DatabaseTarget {
            vdb: ObjectKey::new("default", "vertdb"),
            uid: "uid".to_string(),
            db_name: "vertdb".to_string(),
            password_secret: None,
            catalog_path: "/data".to_string(),
        };
        let request = UnsandboxRequest {
            initiator_ip: "10.0.0.1".to_string(),
            sandbox_initiator_ip: None,
            subcluster: "sc1".to_string(),
            sandbox: "sand".to_string(),
            node_address_map: BTreeMap::from([(
                "v_vertdb_node0004".to_string(),
                "10.0.0.4".to_string(),
            )]),
        };
        dispatcher.unsandbox_subcluster(&db, &request).await.unwrap();
        let details = dispatcher
            .fetch_node_details(&db, "10.0.0.4", "v_vertdb_node0004")
            .await
            .unwrap();
        assert_eq!(details.sandbox, "");
        assert_eq!(dispatcher.verbs().await, vec!["UnsandboxSubcluster", "FetchNodeDetails"]);

        dispatcher.fail_subcluster("sc2").await;
        let mut failing = request.clone();
        failing.subcluster = "sc2".to_string();
        let err = dispatcher.unsandbox_subcluster(&db, &failing).await.unwrap_err();
        assert!(matches!(err, ControllerError::Dispatch { .. }));
    }
}
