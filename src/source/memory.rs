//! In-memory orchestrator and registry
//!
//! Used to drive the engine without a cluster: tests mutate the state
//! between passes and inspect the recorded calls afterwards. Both sides can be
//! told to fail so error handling can be exercised.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{OrchestratorSource, RegistrationRequest, RegistrySource, SourceError};
use crate::model::{LogicalService, NodeAddresses, RegistryEntry};

#[derive(Default)]
pub struct InMemoryOrchestrator {
    services: Mutex<Vec<LogicalService>>,
    nodes: Mutex<Vec<NodeAddresses>>,
    fail_list: AtomicBool,
    fail_nodes: AtomicBool,
    node_list_calls: AtomicUsize,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_services(services: Vec<LogicalService>) -> Self {
        let orchestrator = Self::new();
        *lock(&orchestrator.services) = services;
        orchestrator
    }

    pub fn add_service(&self, service: LogicalService) {
        lock(&self.services).push(service);
    }

    /// Drop a service; returns whether it existed
    pub fn remove_service(&self, name: &str, namespace: &str) -> bool {
        let mut services = lock(&self.services);
        let before = services.len();
        services.retain(|s| !(s.name == name && s.namespace == namespace));
        services.len() != before
    }

    pub fn set_nodes(&self, nodes: Vec<NodeAddresses>) {
        *lock(&self.nodes) = nodes;
    }

    /// Make every call fail until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_list.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_nodes_unavailable(&self, unavailable: bool) {
        self.fail_nodes.store(unavailable, Ordering::SeqCst);
    }

    pub fn node_list_calls(&self) -> usize {
        self.node_list_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("orchestrator offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrchestratorSource for InMemoryOrchestrator {
    async fn list_services(&self) -> Result<Vec<LogicalService>, SourceError> {
        self.check_available()?;
        Ok(lock(&self.services).clone())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeAddresses>, SourceError> {
        self.node_list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.fail_nodes.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("node list offline".to_string()));
        }
        Ok(lock(&self.nodes).clone())
    }

    async fn is_running(&self, name: &str, namespace: &str) -> Result<bool, SourceError> {
        self.check_available()?;
        Ok(lock(&self.services)
            .iter()
            .any(|s| s.name == name && s.namespace == namespace))
    }
}

#[derive(Default)]
pub struct InMemoryRegistry {
    entries: Mutex<Vec<RegistryEntry>>,
    registered: Mutex<Vec<RegistrationRequest>>,
    deregistered: Mutex<Vec<String>>,
    fail_list: AtomicBool,
    /// Number of further register calls that succeed before they start failing
    register_budget: Mutex<Option<usize>>,
    fail_deregister: AtomicBool,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<RegistryEntry>) -> Self {
        let registry = Self::new();
        *lock(&registry.entries) = entries;
        registry
    }

    pub fn entries(&self) -> Vec<RegistryEntry> {
        lock(&self.entries).clone()
    }

    pub fn insert(&self, entry: RegistryEntry) {
        lock(&self.entries).push(entry);
    }

    /// Remove an entry behind the engine's back
    pub fn remove(&self, id: &str) {
        lock(&self.entries).retain(|e| e.id != id);
    }

    /// Every successful register call, in order
    pub fn registered(&self) -> Vec<RegistrationRequest> {
        lock(&self.registered).clone()
    }

    /// Every deregister call, in order
    pub fn deregistered(&self) -> Vec<String> {
        lock(&self.deregistered).clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_list.store(unavailable, Ordering::SeqCst);
    }

    /// Let `count` more registrations succeed, then fail the rest.
    /// `None` lifts the limit.
    pub fn fail_register_after(&self, count: Option<usize>) {
        *lock(&self.register_budget) = count;
    }

    pub fn set_deregister_failing(&self, failing: bool) {
        self.fail_deregister.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("registry offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistrySource for InMemoryRegistry {
    async fn list_entries(&self) -> Result<Vec<RegistryEntry>, SourceError> {
        self.check_available()?;
        Ok(self.entries())
    }

    async fn register(&self, request: &RegistrationRequest) -> Result<RegistryEntry, SourceError> {
        self.check_available()?;
        {
            let mut budget = lock(&self.register_budget);
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(SourceError::Api {
                        status: 500,
                        message: "registration rejected".to_string(),
                    });
                }
                *remaining -= 1;
            }
        }

        let entry = request.to_entry();
        let mut entries = lock(&self.entries);
        entries.retain(|e| e.id != entry.id);
        entries.push(entry.clone());
        lock(&self.registered).push(request.clone());
        Ok(entry)
    }

    async fn deregister(&self, id: &str) -> Result<(), SourceError> {
        self.check_available()?;
        if self.fail_deregister.load(Ordering::SeqCst) {
            return Err(SourceError::Api {
                status: 500,
                message: "deregistration rejected".to_string(),
            });
        }
        lock(&self.entries).retain(|e| e.id != id);
        lock(&self.deregistered).push(id.to_string());
        Ok(())
    }
}

/// Lock ignoring poisoning; a panicking test thread must not hide the state
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
