use clap::Parser;
use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::DynamicObject;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, Client, Resource, ResourceExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use verticadb_controller::{
    config_map_for_statefulset, CacheManager, ControllerError, HealthServer, HealthState,
    KubeEventPublisher, KubeObjectClient, KubePodRunner, OperatorConfig, OperatorContext,
    SandboxController, VclusterOpsDispatcher, VdbController,
};
use verticadb_core::{meta, ObjectKey, Outcome, VerticaDB};

#[derive(Parser)]
#[command(name = "verticadb-operator", about = "VerticaDB Kubernetes operator")]
struct Cli {
    /// Namespace to watch. All namespaces when unset.
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,
    /// Address for the liveness and readiness probes
    #[arg(long, env = "HEALTH_BIND", default_value = "0.0.0.0:8081")]
    health_bind: String,
    /// Sandbox ConfigMaps reconciled in parallel
    #[arg(long, env = "SANDBOX_CONCURRENCY", default_value_t = 1)]
    sandbox_concurrency: u16,
    /// VerticaDBs reconciled in parallel
    #[arg(long, env = "VDB_CONCURRENCY", default_value_t = 5)]
    vdb_concurrency: u16,
    /// Port of the node management agent
    #[arg(long, env = "NMA_PORT", default_value_t = 5554)]
    nma_port: u16,
    /// Log as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
    /// Accept self-signed agent certificates
    #[arg(long, env = "NMA_INSECURE")]
    nma_insecure: bool,
}

/// Shared state handed to a kube-runtime controller
struct ControllerData<C> {
    controller: C,
    config: OperatorConfig,
    /// Consecutive failures per object, reset on success
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl<C> ControllerData<C> {
    fn new(controller: C, config: OperatorConfig) -> Self {
        Self {
            controller,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn succeeded(&self, key: &ObjectKey) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(key);
        }
    }

    fn backoff(&self, key: &ObjectKey) -> Duration {
        let failures = match self.failures.lock() {
            Ok(mut failures) => {
                let count = failures.entry(key.clone()).or_insert(0);
                let current = *count;
                *count = count.saturating_add(1);
                current
            }
            Err(_) => 0,
        };
        self.config.error_backoff(failures)
    }

    /// Drop the failure count of an object the runtime could no longer find
    fn forget_missing(&self, err: &controller::Error<ControllerError, watcher::Error>) {
        if let controller::Error::ObjectNotFound(obj) = err {
            let key = ObjectKey::new(obj.namespace.clone().unwrap_or_default(), obj.name.clone());
            self.succeeded(&key);
        }
    }

    fn action(&self, key: &ObjectKey, outcome: Outcome) -> Action {
        self.succeeded(key);
        match outcome {
            Outcome::Continue | Outcome::Stop => Action::await_change(),
            Outcome::Requeue => Action::requeue(self.config.requeue_wait_min),
            Outcome::RequeueAfter(after) => Action::requeue(after),
        }
    }
}

fn key_of<K: ResourceExt>(obj: &K) -> ObjectKey {
    ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any())
}

async fn reconcile_sandbox(
    cm: Arc<ConfigMap>,
    data: Arc<ControllerData<SandboxController>>,
) -> Result<Action, ControllerError> {
    let key = key_of(cm.as_ref());
    let outcome = data.controller.reconcile(&key).await?;
    Ok(data.action(&key, outcome))
}

async fn reconcile_vdb(
    vdb: Arc<VerticaDB>,
    data: Arc<ControllerData<VdbController>>,
) -> Result<Action, ControllerError> {
    let outcome = data.controller.reconcile(&vdb).await?;
    Ok(data.action(&key_of(vdb.as_ref()), outcome))
}

fn error_policy<K: ResourceExt, C>(obj: Arc<K>, err: &ControllerError, data: Arc<ControllerData<C>>) -> Action {
    let key = key_of(obj.as_ref());
    let backoff = data.backoff(&key);
    warn!("Reconcile of {} failed, retrying in {:?}: {}", key, backoff, err);
    Action::requeue(backoff)
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let health_addr: SocketAddr = cli
        .health_bind
        .parse()
        .map_err(|e| miette::miette!("Invalid health bind address '{}': {}", cli.health_bind, e))?;

    let config = OperatorConfig {
        nma_port: cli.nma_port,
        nma_insecure: cli.nma_insecure,
        ..OperatorConfig::default()
    };

    let client = Client::try_default()
        .await
        .map_err(|e| miette::miette!("Failed to create Kubernetes client: {}", e))?;
    let object_client = Arc::new(KubeObjectClient::new(client.clone()));
    let cache = Arc::new(CacheManager::new(object_client.clone()));
    let dispatcher = Arc::new(
        VclusterOpsDispatcher::new(cache.clone(), &config)
            .map_err(|e| miette::miette!("Failed to create dispatcher: {}", e))?,
    );
    let runner = Arc::new(KubePodRunner::new(client.clone()));
    let ctx = Arc::new(OperatorContext::new(
        object_client,
        runner,
        dispatcher,
        Arc::new(KubeEventPublisher::new(client.clone(), meta::OPERATOR_NAME)),
        config.clone(),
    ));

    let token = CancellationToken::new();

    // 1. Health server
    let health = Arc::new(HealthState::new());
    let health_server = HealthServer::new(health_addr, health.clone());
    let health_token = token.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run(health_token).await {
            error!("Health server error: {}", e);
        }
    });

    let namespace = cli.namespace.as_deref();

    // 2. Sandbox controller, driven by sandbox ConfigMaps and their StatefulSets
    let sandbox_data = Arc::new(ControllerData::new(SandboxController::new(ctx.clone()), config.clone()));
    let sandbox_controller = Controller::new(
        api::<ConfigMap>(&client, namespace),
        watcher::Config::default().labels(&meta::sandbox_config_map_selector()),
    )
    .with_config(controller::Config::default().concurrency(cli.sandbox_concurrency))
    .watches(
        api::<StatefulSet>(&client, namespace),
        watcher::Config::default().labels(meta::SANDBOX_NAME_LABEL),
        |sts| {
            config_map_for_statefulset(&sts)
                .map(|key| ObjectRef::<ConfigMap>::new(&key.name).within(&key.namespace))
        },
    )
    .run(reconcile_sandbox, error_policy, sandbox_data.clone())
    .for_each(move |res| {
        let data = sandbox_data.clone();
        async move {
            if let Err(e) = res {
                data.forget_missing(&e);
                warn!("Sandbox controller: {}", e);
            }
        }
    });

    // 3. VerticaDB controller
    let vdb_data = Arc::new(ControllerData::new(VdbController::new(ctx.clone(), cache), config));
    let vdb_controller = Controller::new(api::<VerticaDB>(&client, namespace), watcher::Config::default())
        .with_config(controller::Config::default().concurrency(cli.vdb_concurrency))
        .owns(api::<StatefulSet>(&client, namespace), watcher::Config::default())
        .run(reconcile_vdb, error_policy, vdb_data.clone())
        .for_each(move |res| {
            let data = vdb_data.clone();
            async move {
                if let Err(e) = res {
                    data.forget_missing(&e);
                    warn!("VerticaDB controller: {}", e);
                }
            }
        });

    health.set_ready(true);
    info!(
        "Controllers started (namespace: {}), health on {}",
        namespace.unwrap_or("<all>"),
        health_addr
    );

    tokio::select! {
        _ = sandbox_controller => warn!("Sandbox controller stream ended"),
        _ = vdb_controller => warn!("VerticaDB controller stream ended"),
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;
        }
    }

    info!("Shutting down gracefully...");
    health.set_ready(false);
    token.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, health_handle).await;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ApiResource;

    fn failure_count(data: &ControllerData<()>, key: &ObjectKey) -> Option<u32> {
        data.failures.lock().unwrap().get(key).copied()
    }

    #[test]
    fn test_failures_cleared_when_object_disappears() {
        let data = ControllerData::new((), OperatorConfig::default());
        let key = ObjectKey::new("default", "vertdb");
        data.backoff(&key);
        data.backoff(&key);
        assert_eq!(failure_count(&data, &key), Some(2));

        // Unrelated runtime errors keep the count
        let other = ObjectRef::<DynamicObject>::new_with("other", ApiResource::erase::<VerticaDB>(&()))
            .within("default");
        data.forget_missing(&controller::Error::ObjectNotFound(other));
        assert_eq!(failure_count(&data, &key), Some(2));

        let gone = ObjectRef::<DynamicObject>::new_with("vertdb", ApiResource::erase::<VerticaDB>(&()))
            .within("default");
        data.forget_missing(&controller::Error::ObjectNotFound(gone));
        assert_eq!(failure_count(&data, &key), None);
    }

    #[test]
    fn test_success_resets_backoff() {
        let data = ControllerData::new((), OperatorConfig::default());
        let key = ObjectKey::new("default", "vertdb");
        let first = data.backoff(&key);
        data.backoff(&key);
        data.action(&key, Outcome::Continue);
        assert_eq!(failure_count(&data, &key), None);
        assert_eq!(data.backoff(&key), first);
    }
}
