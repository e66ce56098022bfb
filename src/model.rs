//! Domain types shared by the resolvers, the engine and the clients
//!
//! These types are deliberately thin views over the orchestrator and registry
//! objects: only the fields the reconciliation needs are carried.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace whose services are never mirrored into the registry
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Namespace the registry itself is deployed into
pub const REGISTRY_NAMESPACE: &str = "consul";

/// Service name the registry uses for its own bookkeeping entry
pub const REGISTRY_SELF_SERVICE: &str = "consul";

/// Placeholder cluster address assigned to headless services
pub const HEADLESS_CLUSTER_IP: &str = "None";

/// Port advertised for load balancer services
pub const LOAD_BALANCER_PORT: u16 = 80;

/// How a logical service is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureMode {
    ClusterLocal,
    NodePort,
    LoadBalancer,
    /// Anything the orchestrator reports that we do not know how to route to
    Unsupported(String),
}

impl ExposureMode {
    /// Map the orchestrator's service type string onto an exposure mode
    pub fn from_service_type(service_type: &str) -> Self {
        match service_type {
            "ClusterIP" => Self::ClusterLocal,
            "NodePort" => Self::NodePort,
            "LoadBalancer" => Self::LoadBalancer,
            other => Self::Unsupported(other.to_string()),
        }
    }
}

/// One declared port of a service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    /// Port exposed on the cluster address
    pub port: u16,
    /// Port on the backing pods; falls back to `port` when not numeric
    pub target_port: u16,
    /// Port opened on every node, when the service has one
    pub node_port: Option<u16>,
}

/// An ingress point populated by the orchestrator for load balancer services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressPoint {
    pub ip: Option<String>,
    pub hostname: Option<String>,
}

/// A named, namespaced service running on the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalService {
    pub name: String,
    pub namespace: String,
    pub mode: ExposureMode,
    /// Cluster-internal virtual address (`None` or "None" for headless services)
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePort>,
    /// Load balancer ingress, in the order the orchestrator reports it
    pub ingress: Vec<IngressPoint>,
}

impl LogicalService {
    /// Create a service with no ports or addresses
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, mode: ExposureMode) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            mode,
            cluster_ip: None,
            ports: Vec::new(),
            ingress: Vec::new(),
        }
    }

    pub fn with_cluster_ip(mut self, ip: impl Into<String>) -> Self {
        self.cluster_ip = Some(ip.into());
        self
    }

    pub fn with_port(mut self, port: ServicePort) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_ingress(mut self, ingress: IngressPoint) -> Self {
        self.ingress.push(ingress);
        self
    }

    /// Key under which this service is stored in the registry
    pub fn registry_key(&self) -> String {
        registry_key(&self.name, &self.namespace)
    }

    /// Orchestrator plumbing that must never be mirrored into the registry
    pub fn is_system_service(&self) -> bool {
        self.namespace == SYSTEM_NAMESPACE
            || self.namespace == REGISTRY_NAMESPACE
            || (self.namespace == "default" && self.name == "kubernetes")
    }
}

impl fmt::Display for LogicalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Canonical registry key for a service: `<name>-<namespace>`
pub fn registry_key(name: &str, namespace: &str) -> String {
    format!("{}-{}", name, namespace)
}

/// Reachability class of a node address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressClass {
    Internal,
    External,
}

/// One address of a cluster node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddressRecord {
    pub address: String,
    pub class: AddressClass,
}

impl NodeAddressRecord {
    pub fn internal(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            class: AddressClass::Internal,
        }
    }

    pub fn external(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            class: AddressClass::External,
        }
    }
}

/// All known addresses of a single node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddresses {
    pub node: String,
    pub addresses: Vec<NodeAddressRecord>,
}

impl NodeAddresses {
    pub fn new(node: impl Into<String>, addresses: Vec<NodeAddressRecord>) -> Self {
        Self {
            node: node.into(),
            addresses,
        }
    }
}

/// A reachable (address, port) pair for one instance of a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub address: String,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// One instance record in the service registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    /// Canonical service key the entry was registered under
    pub service: String,
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
}

impl RegistryEntry {
    /// The registry's own bookkeeping entry
    pub fn is_system_entry(&self) -> bool {
        self.service == REGISTRY_SELF_SERVICE
    }
}
