//! Builders for test worlds: a VerticaDB with StatefulSets, pods, scripted
//! gather output and dispatcher node state, all backed by the mocks.

use crate::config::OperatorConfig;
use crate::context::OperatorContext;
use crate::events::RecordingEventPublisher;
use crate::mock::{MockDispatcher, MockObjectClient, MockPodRunner};
use crate::podfacts::{PodFact, GATHER_MARKER};
use crate::types::{NodeDetails, NodeState};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerStatus, Pod, PodSpec, PodStatus, PodTemplateSpec, Probe,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use verticadb_core::crd::{conditions, CommunalStorage, LocalStorage};
use verticadb_core::{
    meta, names, InitPolicy, ObjectKey, Subcluster, SubclusterType, VerticaDB, VerticaDbSpec,
    VerticaDbStatus,
};

pub const TEST_NAMESPACE: &str = "default";
pub const TEST_VDB: &str = "vertdb";

/// Desired state of one test pod
#[derive(Debug, Clone)]
pub struct PodState {
    pub running: bool,
    pub up: bool,
    pub db_exists: bool,
    pub read_only: bool,
    pub pid_running: bool,
    pub startup_complete: bool,
    pub dc_annotations: bool,
}

impl PodState {
    pub fn up() -> Self {
        Self {
            running: true,
            up: true,
            db_exists: true,
            read_only: false,
            pid_running: true,
            startup_complete: true,
            dc_annotations: true,
        }
    }

    /// Running pod with the server process down
    pub fn down() -> Self {
        Self {
            up: false,
            pid_running: false,
            ..Self::up()
        }
    }

    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::up()
        }
    }

    pub fn not_running() -> Self {
        Self {
            running: false,
            up: false,
            pid_running: false,
            ..Self::up()
        }
    }
}

/// Mocks wired into an `OperatorContext`
pub struct TestWorld {
    pub client: MockObjectClient,
    pub runner: MockPodRunner,
    pub dispatcher: MockDispatcher,
    pub events: Arc<RecordingEventPublisher>,
    pub ctx: Arc<OperatorContext>,
}

impl TestWorld {
    pub fn new() -> Self {
        let client = MockObjectClient::new();
        let runner = MockPodRunner::new();
        let dispatcher = MockDispatcher::new();
        let events = Arc::new(RecordingEventPublisher::new());
        let ctx = Arc::new(OperatorContext::new(
            Arc::new(client.clone()),
            Arc::new(runner.clone()),
            Arc::new(dispatcher.clone()),
            events.clone(),
            OperatorConfig::default(),
        ));
        Self {
            client,
            runner,
            dispatcher,
            events,
            ctx,
        }
    }

    pub async fn add_vdb(&self, vdb: VerticaDB) {
        self.client.insert_vdb(vdb).await;
    }

    /// Current stored VerticaDB
    pub async fn vdb(&self) -> VerticaDB {
        self.client
            .vdb(&ObjectKey::new(TEST_NAMESPACE, TEST_VDB))
            .await
            .expect("test vdb missing")
    }

    /// Create the StatefulSet and pods of a subcluster, one pod per state
    pub async fn add_pods(&self, vdb: &VerticaDB, subcluster: &str, states: &[PodState]) {
        let sc = vdb
            .find_subcluster(subcluster)
            .expect("subcluster not in spec")
            .clone();
        let sandbox = sandbox_of(vdb, subcluster);
        self.client
            .insert_statefulset(make_test_sts(vdb, &sc, states.len() as i32, &sandbox))
            .await;
        let offset = node_offset(vdb, subcluster);
        let sc_pos = vdb
            .spec
            .subclusters
            .iter()
            .position(|s| s.name == subcluster)
            .unwrap_or(0);
        for (i, state) in states.iter().enumerate() {
            let index = i as i32;
            let ip = format!("10.0.{}.{}", sc_pos, i + 1);
            let vnode = format!("v_vertdb_node{:04}", offset + i + 1);
            let pod = make_test_pod(vdb, &sc, index, &ip, state);
            let key = names::pod_name(vdb, &sc, index);
            self.client.insert_pod(pod).await;
            self.runner
                .set_output(&key, GATHER_MARKER, gather_output(state, &vnode))
                .await;
            let node_state = if state.up { NodeState::Up } else { NodeState::Down };
            self.dispatcher.set_node_state(&vnode, node_state).await;
            self.dispatcher
                .set_node_details(
                    &vnode,
                    NodeDetails {
                        read_only: state.read_only,
                        sandbox: sandbox.clone(),
                        subcluster_oid: format!("45{:02}", sc_pos),
                    },
                )
                .await;
        }
    }
}

/// Sandbox a subcluster lives in, from spec, else from status
fn sandbox_of(vdb: &VerticaDB, subcluster: &str) -> String {
    vdb.subcluster_sandbox_map()
        .remove(subcluster)
        .or_else(|| vdb.subcluster_sandbox_status_map().remove(subcluster))
        .unwrap_or_default()
}

fn node_offset(vdb: &VerticaDB, subcluster: &str) -> usize {
    vdb.spec
        .subclusters
        .iter()
        .take_while(|s| s.name != subcluster)
        .map(|s| s.size.max(0) as usize)
        .sum()
}

/// EON VerticaDB with a 3-node primary subcluster "main", deployed with
/// vclusterops at v24.3.0 and already initialized
pub fn make_test_vdb() -> VerticaDB {
    let mut vdb = VerticaDB::new(
        TEST_VDB,
        VerticaDbSpec {
            image: "vertica/vertica-k8s:24.3.0".to_string(),
            db_name: "vertdb".to_string(),
            init_policy: InitPolicy::Create,
            communal: CommunalStorage {
                path: "s3://bucket/db".to_string(),
                endpoint: "https://s3.amazonaws.com".to_string(),
                include_uid_in_path: false,
                additional_config: BTreeMap::new(),
            },
            local: LocalStorage::default(),
            shard_count: 6,
            auto_restart_vertica: true,
            password_secret: None,
            subclusters: vec![make_test_subcluster("main", SubclusterType::Primary, 3)],
            sandboxes: vec![],
        },
    );
    vdb.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    vdb.metadata.uid = Some("vdb-uid".to_string());
    vdb.metadata.annotations = Some(BTreeMap::from([
        (meta::VCLUSTER_OPS_ANNOTATION.to_string(), "true".to_string()),
        (meta::VERSION_ANNOTATION.to_string(), "v24.3.0".to_string()),
    ]));
    let mut status = VerticaDbStatus::default();
    status.set_condition(conditions::DB_INITIALIZED, true, "Initialized");
    vdb.status = Some(status);
    vdb
}

pub fn make_test_subcluster(name: &str, type_: SubclusterType, size: i32) -> Subcluster {
    Subcluster {
        name: name.to_string(),
        type_,
        size,
        shutdown: false,
    }
}

fn server_and_nma(image: &str) -> Vec<Container> {
    vec![
        Container {
            name: meta::SERVER_CONTAINER.to_string(),
            image: Some(image.to_string()),
            liveness_probe: Some(Probe {
                period_seconds: Some(30),
                failure_threshold: Some(6),
                ..Default::default()
            }),
            ..Default::default()
        },
        Container {
            name: meta::NMA_CONTAINER.to_string(),
            image: Some(image.to_string()),
            ..Default::default()
        },
    ]
}

pub fn make_test_sts(vdb: &VerticaDB, sc: &Subcluster, replicas: i32, sandbox: &str) -> StatefulSet {
    let key = names::sts_name(vdb, sc);
    let mut labels = BTreeMap::from([
        (meta::SUBCLUSTER_NAME_LABEL.to_string(), sc.name.clone()),
        (meta::INSTANCE_LABEL.to_string(), TEST_VDB.to_string()),
    ]);
    if !sandbox.is_empty() {
        labels.insert(meta::SANDBOX_NAME_LABEL.to_string(), sandbox.to_string());
    }
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(key.name),
            namespace: Some(key.namespace),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: server_and_nma(vdb.target_image(sandbox)),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn make_test_pod(vdb: &VerticaDB, sc: &Subcluster, index: i32, ip: &str, state: &PodState) -> Pod {
    let key = names::pod_name(vdb, sc, index);
    let annotations = state.dc_annotations.then(|| {
        BTreeMap::from([
            (meta::KUBERNETES_VERSION_ANNOTATION.to_string(), "v1.31.0".to_string()),
            (meta::KUBERNETES_GIT_COMMIT_ANNOTATION.to_string(), "abc123".to_string()),
            (
                meta::KUBERNETES_BUILD_DATE_ANNOTATION.to_string(),
                "2024-08-13T07:28:49Z".to_string(),
            ),
        ])
    });
    let sandbox = sandbox_of(vdb, &sc.name);
    Pod {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace),
            annotations,
            ..Default::default()
        },
        spec: Some(PodSpec {
            hostname: Some(key.name),
            subdomain: Some(TEST_VDB.to_string()),
            containers: server_and_nma(vdb.target_image(&sandbox)),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(if state.running { "Running" } else { "Pending" }.to_string()),
            pod_ip: state.running.then(|| ip.to_string()),
            container_statuses: Some(vec![
                ContainerStatus {
                    name: meta::SERVER_CONTAINER.to_string(),
                    ready: state.up,
                    started: Some(state.running),
                    ..Default::default()
                },
                ContainerStatus {
                    name: meta::NMA_CONTAINER.to_string(),
                    ready: state.running,
                    started: Some(state.running),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
    }
}

/// YAML the gather script would print for a pod in `state`
pub fn gather_output(state: &PodState, vnode: &str) -> String {
    format!(
        "installIndicatorExists: true\neulaAccepted: true\ndbExists: {}\ncompat21NodeName: \"\"\nvnodeName: {}\nupNode: {}\nstartupComplete: {}\nverticaPIDRunning: {}\n",
        state.db_exists,
        if state.db_exists { vnode } else { "\"\"" },
        state.up,
        state.startup_complete,
        state.pid_running,
    )
}

/// Up, writable primary fact with every readiness flag set
pub fn make_pod_fact(subcluster: &str, index: i32) -> PodFact {
    let name = format!("{}-{}-{}", TEST_VDB, subcluster, index);
    PodFact {
        name: ObjectKey::new(TEST_NAMESPACE, name.clone()),
        pod_ip: format!("10.1.0.{}", index + 1),
        dns_name: format!("{}.{}.{}", name, TEST_VDB, TEST_NAMESPACE),
        vnode_name: format!("v_vertdb_{}_node{:04}", subcluster, index + 1),
        subcluster_name: subcluster.to_string(),
        pod_index: index,
        exec_container: meta::NMA_CONTAINER.to_string(),
        exists: true,
        is_pod_running: true,
        is_installed: true,
        is_primary: true,
        managed_by_parent: true,
        up_node: true,
        db_exists: true,
        eula_accepted: true,
        has_dc_table_annotations: true,
        has_nma_sidecar: true,
        is_nma_container_ready: true,
        ..Default::default()
    }
}

/// Sandbox ConfigMap as the VerticaDB controller creates it
pub fn make_test_sandbox_cm(vdb: &VerticaDB, sandbox: &str, trigger: Option<&str>) -> ConfigMap {
    let key = names::sandbox_config_map_name(vdb, sandbox);
    let annotations = trigger.map(|t| {
        BTreeMap::from([(meta::UNSANDBOX_TRIGGER_ID_ANNOTATION.to_string(), t.to_string())])
    });
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(key.name),
            namespace: Some(key.namespace),
            labels: Some(meta::sandbox_config_map_labels(TEST_VDB)),
            annotations,
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (meta::VERTICADB_NAME_KEY.to_string(), TEST_VDB.to_string()),
            (meta::SANDBOX_NAME_KEY.to_string(), sandbox.to_string()),
        ])),
        ..Default::default()
    }
}
