//! Collaborator contracts for the two external systems
//!
//! The engine only talks to the orchestrator and the registry through these
//! traits, so the concrete HTTP clients in [`crate::client`] and the
//! in-memory stand-ins in [`memory`] are interchangeable.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{LogicalService, NodeAddresses, RegistryEntry, ServiceEndpoint};

/// A call into the orchestrator or the registry failed
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::Parse(e.to_string())
        } else {
            SourceError::Http(e.to_string())
        }
    }
}

/// A single instance to be added to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    /// Registry-wide unique id for the new entry
    pub id: String,
    /// Canonical service key
    pub service: String,
    pub tags: Vec<String>,
    pub endpoint: ServiceEndpoint,
}

impl RegistrationRequest {
    /// The entry the registry should hold once the request succeeds
    pub fn to_entry(&self) -> RegistryEntry {
        RegistryEntry {
            id: self.id.clone(),
            service: self.service.clone(),
            tags: self.tags.clone(),
            address: self.endpoint.address.clone(),
            port: self.endpoint.port,
        }
    }
}

/// Read access to the container orchestrator
#[async_trait]
pub trait OrchestratorSource: Send + Sync {
    /// All services in all namespaces
    async fn list_services(&self) -> Result<Vec<LogicalService>, SourceError>;

    /// Addresses of every node in the cluster
    async fn list_nodes(&self) -> Result<Vec<NodeAddresses>, SourceError>;

    /// Whether a service with this name exists in this namespace
    async fn is_running(&self, name: &str, namespace: &str) -> Result<bool, SourceError>;
}

/// Read/write access to the service registry
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn list_entries(&self) -> Result<Vec<RegistryEntry>, SourceError>;

    async fn register(&self, request: &RegistrationRequest) -> Result<RegistryEntry, SourceError>;

    /// Remove an entry. Removing an entry that is already gone succeeds.
    async fn deregister(&self, id: &str) -> Result<(), SourceError>;
}
