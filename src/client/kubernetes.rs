//! Orchestrator source backed by the Kubernetes API
//!
//! Only the core/v1 `services` and `nodes` collections are read; nothing is
//! ever written back to the cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::debug;

use crate::model::{
    ExposureMode, IngressPoint, LogicalService, NodeAddressRecord, NodeAddresses, ServicePort,
};
use crate::source::{OrchestratorSource, SourceError};

// ============================================================================
// SBIO: Pure conversion (no I/O)
// ============================================================================

fn port_number(value: i32) -> u16 {
    u16::try_from(value).unwrap_or(0)
}

impl From<k8s_openapi::api::core::v1::ServicePort> for ServicePort {
    fn from(port: k8s_openapi::api::core::v1::ServicePort) -> Self {
        let service_port = port_number(port.port);
        // Named target ports cannot be resolved without the pods; the
        // service port is the best guess
        let target_port = match port.target_port {
            Some(IntOrString::Int(n)) => port_number(n),
            Some(IntOrString::String(_)) | None => service_port,
        };
        ServicePort {
            port: service_port,
            target_port,
            node_port: port.node_port.map(port_number).filter(|p| *p != 0),
        }
    }
}

impl From<Service> for LogicalService {
    fn from(svc: Service) -> Self {
        let spec = svc.spec.unwrap_or_default();
        let ingress = svc
            .status
            .and_then(|status| status.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default();

        LogicalService {
            name: svc.metadata.name.unwrap_or_default(),
            namespace: svc.metadata.namespace.unwrap_or_default(),
            mode: ExposureMode::from_service_type(spec.type_.as_deref().unwrap_or("ClusterIP")),
            cluster_ip: spec.cluster_ip.filter(|ip| !ip.is_empty()),
            ports: spec
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(ServicePort::from)
                .collect(),
            ingress: ingress
                .into_iter()
                .map(|i| IngressPoint {
                    ip: i.ip,
                    hostname: i.hostname,
                })
                .collect(),
        }
    }
}

impl From<Node> for NodeAddresses {
    fn from(node: Node) -> Self {
        let addresses = node
            .status
            .and_then(|status| status.addresses)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| match a.type_.as_str() {
                "InternalIP" => Some(NodeAddressRecord::internal(a.address)),
                "ExternalIP" => Some(NodeAddressRecord::external(a.address)),
                _ => None,
            })
            .collect();
        NodeAddresses::new(node.metadata.name.unwrap_or_default(), addresses)
    }
}

// ============================================================================
// SBIO: I/O implementation (kube client)
// ============================================================================

#[derive(Clone)]
pub struct KubernetesClient {
    client: Client,
    cluster_url: String,
}

impl KubernetesClient {
    pub fn new(config: kube::Config) -> Result<Self, SourceError> {
        let cluster_url = config.cluster_url.to_string();
        let client = Client::try_from(config)?;
        Ok(Self {
            client,
            cluster_url,
        })
    }

    pub fn cluster_url(&self) -> &str {
        &self.cluster_url
    }
}

#[async_trait]
impl OrchestratorSource for KubernetesClient {
    async fn list_services(&self) -> Result<Vec<LogicalService>, SourceError> {
        let api: Api<Service> = Api::all(self.client.clone());
        let services = api.list(&ListParams::default()).await?;
        debug!("Kubernetes reports {} services", services.items.len());
        Ok(services.items.into_iter().map(LogicalService::from).collect())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeAddresses>, SourceError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await?;
        Ok(nodes.items.into_iter().map(NodeAddresses::from).collect())
    }

    async fn is_running(&self, name: &str, namespace: &str) -> Result<bool, SourceError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let found = api.get_opt(name).await?.is_some();
        if found {
            debug!("Service {}/{} is running on Kubernetes", namespace, name);
        }
        Ok(found)
    }
}
