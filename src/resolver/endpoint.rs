//! Endpoint resolution per exposure mode and hosting provider

use std::fmt;

use tracing::{debug, trace};

use super::node_address::select_node_addresses;
use crate::model::{
    ExposureMode, LogicalService, ServiceEndpoint, HEADLESS_CLUSTER_IP, LOAD_BALANCER_PORT,
};
use crate::source::{OrchestratorSource, SourceError};

/// Cloud the cluster is hosted on. Only affects load balancer services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudProvider {
    Aws,
    Openstack,
    Other(String),
}

impl CloudProvider {
    /// Names are case sensitive: `AWS` is an unknown provider
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "aws" => Self::Aws,
            "openstack" => Self::Openstack,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aws => f.write_str("aws"),
            Self::Openstack => f.write_str("openstack"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Compute the reachable endpoints of a service.
///
/// `node_addresses` is only consulted for node-port services. Missing or
/// partially populated upstream data yields no endpoints rather than an error.
pub fn resolve_endpoints(
    service: &LogicalService,
    provider: &CloudProvider,
    node_addresses: &[String],
) -> Vec<ServiceEndpoint> {
    match &service.mode {
        ExposureMode::ClusterLocal => cluster_local_endpoint(service).into_iter().collect(),
        ExposureMode::NodePort => node_port_endpoints(service, node_addresses),
        ExposureMode::LoadBalancer => load_balancer_endpoint(service, provider)
            .into_iter()
            .collect(),
        ExposureMode::Unsupported(kind) => {
            trace!("Service {} has unsupported type {}", service, kind);
            Vec::new()
        }
    }
}

fn cluster_local_endpoint(service: &LogicalService) -> Option<ServiceEndpoint> {
    let address = service
        .cluster_ip
        .as_deref()
        .filter(|ip| !ip.is_empty() && *ip != HEADLESS_CLUSTER_IP)?;
    let port = service.ports.first()?.target_port;
    if port == 0 {
        return None;
    }
    Some(ServiceEndpoint::new(address, port))
}

fn node_port_endpoints(service: &LogicalService, node_addresses: &[String]) -> Vec<ServiceEndpoint> {
    let Some(node_port) = service.ports.first().and_then(|p| p.node_port) else {
        return Vec::new();
    };
    node_addresses
        .iter()
        .map(|address| ServiceEndpoint::new(address.as_str(), node_port))
        .collect()
}

/// Only one endpoint per load balancer service, always on the HTTP port.
fn load_balancer_endpoint(
    service: &LogicalService,
    provider: &CloudProvider,
) -> Option<ServiceEndpoint> {
    let address = match provider {
        CloudProvider::Aws => service.ingress.first()?.hostname.as_deref(),
        // The OpenStack load balancer reports its floating IP second
        CloudProvider::Openstack => service.ingress.get(1)?.ip.as_deref(),
        CloudProvider::Other(_) => None,
    }
    .filter(|address| !address.is_empty())?;

    Some(ServiceEndpoint::new(address, LOAD_BALANCER_PORT))
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Endpoint resolution bound to a provider, fetching node addresses lazily
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    provider: CloudProvider,
}

impl EndpointResolver {
    pub fn new(provider: CloudProvider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &CloudProvider {
        &self.provider
    }

    /// Resolve endpoints, asking the orchestrator for nodes only when the
    /// service is exposed per node. Fails only if that node lookup fails.
    pub async fn resolve(
        &self,
        service: &LogicalService,
        orchestrator: &dyn OrchestratorSource,
    ) -> Result<Vec<ServiceEndpoint>, SourceError> {
        let node_addresses = if service.mode == ExposureMode::NodePort {
            let nodes = orchestrator.list_nodes().await?;
            select_node_addresses(&nodes)
        } else {
            Vec::new()
        };

        let endpoints = resolve_endpoints(service, &self.provider, &node_addresses);
        debug!("Endpoints for service {}: {:?}", service, endpoints);
        Ok(endpoints)
    }
}
