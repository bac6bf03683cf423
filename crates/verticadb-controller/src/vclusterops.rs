//! `Dispatcher` backed by the database's HTTPS service and the node
//! management agent (NMA) running next to each server.
//!
//! HTTPS endpoints need the database to be up and authenticate as the
//! superuser. NMA endpoints work on a stopped database and act on the local
//! catalog of the host they are sent to.

use crate::cache::CacheManager;
use crate::config::OperatorConfig;
use crate::error::{ControllerError, Result};
use crate::traits::Dispatcher;
use crate::types::{CommunalParams, DatabaseTarget, NodeDetails, NodeState, ReIpHost, UnsandboxRequest};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use verticadb_core::{meta, Outcome};

/// Port of the database's HTTPS service
pub const HTTPS_PORT: u16 = 8443;
const SUPERUSER: &str = "dbadmin";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
enum Service {
    Https,
    Nma,
}

#[derive(Debug, Deserialize)]
struct NodeListResponse {
    #[serde(default)]
    node_list: Vec<NodeInfo>,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    is_readonly: bool,
    #[serde(default)]
    sandbox_name: String,
    #[serde(default)]
    subcluster_oid: String,
}

#[derive(Debug, Deserialize)]
struct CatalogDatabase {
    #[serde(default)]
    nodes: Vec<CatalogNode>,
}

#[derive(Debug, Deserialize)]
struct CatalogNode {
    name: String,
    address: String,
    #[serde(default)]
    start_command: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StartNodeBody<'a> {
    start_command: &'a [String],
    startup_conf: &'a str,
}

#[derive(Debug, Serialize)]
struct ReIpEntry<'a> {
    node_name: &'a str,
    address: &'a str,
    control_address: &'a str,
}

#[derive(Debug, Serialize)]
struct ReIpBody<'a> {
    catalog_path: &'a str,
    re_ip_list: Vec<ReIpEntry<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    communal_storage_location: Option<&'a str>,
}

pub struct VclusterOpsDispatcher {
    http: Client,
    cache: Arc<CacheManager>,
    scheme: &'static str,
    https_port: u16,
    nma_port: u16,
}

impl VclusterOpsDispatcher {
    pub fn new(cache: Arc<CacheManager>, config: &OperatorConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.nma_insecure)
            .build()?;
        Ok(Self {
            http,
            cache,
            scheme: "https",
            https_port: HTTPS_PORT,
            nma_port: config.nma_port,
        })
    }

    fn url(&self, host: &str, service: Service, path: &str) -> String {
        let port = match service {
            Service::Https => self.https_port,
            Service::Nma => self.nma_port,
        };
        format!("{}://{}:{}/v1/{}", self.scheme, host, port, path)
    }

    /// Build a request, adding superuser credentials for HTTPS endpoints
    async fn request(
        &self,
        db: &DatabaseTarget,
        method: Method,
        host: &str,
        service: Service,
        path: &str,
    ) -> Result<RequestBuilder> {
        let url = self.url(host, service, path);
        debug!("{} {}", method, url);
        let builder = self.http.request(method, url);
        Ok(match service {
            Service::Https => {
                let password = self.cache.get_or_fetch_password(db).await?;
                builder.basic_auth(SUPERUSER, Some(password))
            }
            Service::Nma => builder,
        })
    }

    async fn send(&self, verb: &str, builder: RequestBuilder) -> Result<Response> {
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let url = resp.url().to_string();
            let body = resp.text().await.unwrap_or_default();
            return Err(ControllerError::dispatch(
                verb,
                format!("{} returned {}: {}", url, status, body),
            ));
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, verb: &str, builder: RequestBuilder) -> Result<T> {
        let resp = self.send(verb, builder).await?;
        resp.json::<T>().await.map_err(|e| {
            ControllerError::dispatch(verb, format!("Failed to parse response: {}", e))
        })
    }

    async fn start_nodes(&self, verb: &str, db: &DatabaseTarget, commands: &[(&str, &[String])]) -> Result<()> {
        for (host, start_command) in commands {
            let body = StartNodeBody {
                start_command,
                startup_conf: meta::STARTUP_CONF_FILE,
            };
            let req = self
                .request(db, Method::POST, host, Service::Nma, "nodes/start")
                .await?
                .json(&body);
            self.send(verb, req).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for VclusterOpsDispatcher {
    async fn restart_node(
        &self,
        db: &DatabaseTarget,
        initiator_ip: &str,
        hosts: &[(String, String)],
    ) -> Result<Outcome> {
        const VERB: &str = "RestartNode";
        let req = self
            .request(db, Method::GET, initiator_ip, Service::Https, "startup/commands")
            .await?;
        let commands: HashMap<String, Vec<String>> = self.get_json(VERB, req).await?;

        let mut starts = Vec::with_capacity(hosts.len());
        for (vnode, ip) in hosts {
            let cmd = commands.get(vnode).ok_or_else(|| {
                ControllerError::dispatch(VERB, format!("No start command for node {}", vnode))
            })?;
            starts.push((ip.as_str(), cmd.as_slice()));
        }
        self.start_nodes(VERB, db, &starts).await?;
        info!("Restarted {} node(s) of {}", hosts.len(), db.vdb);
        Ok(Outcome::Continue)
    }

    async fn re_ip(
        &self,
        db: &DatabaseTarget,
        initiator_ip: &str,
        hosts: &[ReIpHost],
        communal: Option<&CommunalParams>,
    ) -> Result<Outcome> {
        const VERB: &str = "ReIP";
        let body = ReIpBody {
            catalog_path: &db.catalog_path,
            re_ip_list: hosts
                .iter()
                .map(|h| ReIpEntry {
                    node_name: &h.vnode,
                    address: &h.ip,
                    control_address: &h.ip,
                })
                .collect(),
            communal_storage_location: communal.map(|c| c.path.as_str()),
        };
        // Every catalog copy must learn the new addresses
        let mut targets: Vec<&str> = hosts.iter().map(|h| h.ip.as_str()).collect();
        if !targets.contains(&initiator_ip) {
            targets.push(initiator_ip);
        }
        for host in targets {
            let req = self
                .request(db, Method::PUT, host, Service::Nma, "catalog/re-ip")
                .await?
                .json(&body);
            self.send(VERB, req).await?;
        }
        Ok(Outcome::Continue)
    }

    async fn start_db(
        &self,
        db: &DatabaseTarget,
        initiator_ip: &str,
        host_ips: &[String],
        _communal: Option<&CommunalParams>,
        sandbox: &str,
    ) -> Result<Outcome> {
        const VERB: &str = "StartDB";
        let req = self
            .request(db, Method::GET, initiator_ip, Service::Nma, "catalog/database")
            .await?
            .query(&[("catalog_path", db.catalog_path.as_str())]);
        let catalog: CatalogDatabase = self.get_json(VERB, req).await?;

        let mut starts = Vec::with_capacity(host_ips.len());
        for ip in host_ips {
            let node = catalog.nodes.iter().find(|n| &n.address == ip).ok_or_else(|| {
                ControllerError::dispatch(VERB, format!("Host {} is not in the catalog", ip))
            })?;
            debug!("Starting node {} at {}", node.name, ip);
            starts.push((ip.as_str(), node.start_command.as_slice()));
        }
        self.start_nodes(VERB, db, &starts).await?;
        info!("Started {} node(s) of {} (sandbox '{}')", host_ips.len(), db.vdb, sandbox);
        Ok(Outcome::Continue)
    }

    async fn stop_db(&self, db: &DatabaseTarget, initiator_ip: &str, sandbox: &str) -> Result<Outcome> {
        let req = self
            .request(db, Method::POST, initiator_ip, Service::Https, "cluster/shutdown")
            .await?;
        self.send("StopDB", req).await?;
        info!("Stopped {} (sandbox '{}')", db.vdb, sandbox);
        Ok(Outcome::Continue)
    }

    async fn fetch_node_state(
        &self,
        db: &DatabaseTarget,
        initiator_ip: &str,
        _host_ips: &[String],
    ) -> Result<HashMap<String, NodeState>> {
        let req = self
            .request(db, Method::GET, initiator_ip, Service::Https, "nodes")
            .await?;
        let resp: NodeListResponse = self.get_json("FetchNodeState", req).await?;
        Ok(resp
            .node_list
            .into_iter()
            .map(|n| {
                let state = match n.state.as_str() {
                    "UP" => NodeState::Up,
                    "DOWN" => NodeState::Down,
                    _ => NodeState::Unknown,
                };
                (n.name, state)
            })
            .collect())
    }

    async fn fetch_node_details(&self, db: &DatabaseTarget, host_ip: &str, vnode: &str) -> Result<NodeDetails> {
        const VERB: &str = "FetchNodeDetails";
        let path = format!("nodes/{}", host_ip);
        let req = self.request(db, Method::GET, host_ip, Service::Https, &path).await?;
        let resp: NodeListResponse = self.get_json(VERB, req).await?;
        let node = resp
            .node_list
            .into_iter()
            .find(|n| n.name == vnode || n.address == host_ip)
            .ok_or_else(|| ControllerError::dispatch(VERB, format!("Host {} reported no node {}", host_ip, vnode)))?;
        Ok(NodeDetails {
            read_only: node.is_readonly,
            sandbox: node.sandbox_name,
            subcluster_oid: node.subcluster_oid,
        })
    }

    async fn unsandbox_subcluster(&self, db: &DatabaseTarget, request: &UnsandboxRequest) -> Result<Outcome> {
        const VERB: &str = "UnsandboxSubcluster";
        let sc = &request.subcluster;

        // Nodes must be down in the sandbox before the main cluster takes them
        if let Some(sandbox_ip) = request.sandbox_initiator_ip.as_deref() {
            let path = format!("subclusters/{}/shutdown", sc);
            let req = self.request(db, Method::POST, sandbox_ip, Service::Https, &path).await?;
            self.send(VERB, req).await?;
        }

        // Correct addresses the main catalog still holds for these nodes
        for (vnode, ip) in &request.node_address_map {
            if ip.is_empty() {
                continue;
            }
            let path = format!("nodes/{}/ip", vnode);
            let req = self
                .request(db, Method::PUT, &request.initiator_ip, Service::Https, &path)
                .await?
                .query(&[("host", ip.as_str()), ("control-host", ip.as_str())]);
            self.send(VERB, req).await?;
        }

        let path = format!("subclusters/{}/unsandbox", sc);
        let req = self
            .request(db, Method::POST, &request.initiator_ip, Service::Https, &path)
            .await?;
        self.send(VERB, req).await?;
        info!("Subcluster {} left sandbox {}", sc, request.sandbox);
        Ok(Outcome::Continue)
    }
}
