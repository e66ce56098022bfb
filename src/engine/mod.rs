//! Reconciliation engine
//!
//! Runs the convergence loop between the orchestrator and the registry:
//!
//! 1. **Registration**: every non-system service that has no entry owned by
//!    this cluster gets one entry per resolved endpoint.
//! 2. **Deregistration**: every entry owned by this cluster whose service is
//!    no longer running is removed.
//!
//! Each pass reads both systems fresh, so repeated passes with no external
//! change are no-ops and the periodic schedule doubles as the retry
//! mechanism.

mod report;

pub use report::PassReport;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::model::{LogicalService, RegistryEntry, ServiceEndpoint};
use crate::resolver::{CloudProvider, EndpointResolver};
use crate::source::{OrchestratorSource, RegistrationRequest, RegistrySource, SourceError};
use crate::tags::{contains_all, identity_tags, OwnershipTags};

/// Default period between passes
pub const DEFAULT_INTERVAL_SECS: u64 = 10;

/// What to do when a call into either system fails mid-pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log, abandon the rest of the pass, try again on the next tick
    #[default]
    SkipPass,
    /// Stop the loop and hand the error to the caller
    Abort,
}

/// Step of a pass a source call was made from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ListServices,
    ListEntries,
    ResolveEndpoints,
    Register,
    CheckRunning,
    Deregister,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ListServices => "listing services",
            Phase::ListEntries => "listing registry entries",
            Phase::ResolveEndpoints => "resolving endpoints",
            Phase::Register => "registering endpoint",
            Phase::CheckRunning => "checking service liveness",
            Phase::Deregister => "deregistering entry",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{phase} failed: {source}")]
    Source {
        phase: Phase,
        #[source]
        source: SourceError,
    },
}

impl EngineError {
    fn at(phase: Phase) -> impl FnOnce(SourceError) -> Self {
        move |source| EngineError::Source { phase, source }
    }

    pub fn phase(&self) -> Phase {
        match self {
            EngineError::Source { phase, .. } => *phase,
        }
    }
}

/// Configuration for the reconciliation engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Value of the `kube` tag on every entry this cluster owns
    pub cluster_id: String,

    pub provider: CloudProvider,

    /// Time between the start of two passes
    pub interval: Duration,

    pub failure_policy: FailurePolicy,

    /// Decide but do not call register/deregister
    pub dry_run: bool,
}

impl EngineConfig {
    pub fn new(cluster_id: impl Into<String>, provider: CloudProvider) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            provider,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            failure_policy: FailurePolicy::default(),
            dry_run: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

pub struct ReconciliationEngine {
    config: EngineConfig,
    resolver: EndpointResolver,
    orchestrator: Arc<dyn OrchestratorSource>,
    registry: Arc<dyn RegistrySource>,
    /// Entries of a failed registration that could not be rolled back
    stranded: Mutex<Vec<String>>,
}

impl ReconciliationEngine {
    pub fn new(
        config: EngineConfig,
        orchestrator: Arc<dyn OrchestratorSource>,
        registry: Arc<dyn RegistrySource>,
    ) -> Self {
        let resolver = EndpointResolver::new(config.provider.clone());
        Self {
            config,
            resolver,
            orchestrator,
            registry,
            stranded: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run passes on a fixed schedule until shutdown is signalled.
    ///
    /// The first pass starts immediately. Under [`FailurePolicy::Abort`] the
    /// first failing pass ends the loop with its error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut iteration = 0u64;

        info!(
            "Reconciliation started: cluster={}, provider={}, interval={}s, dry_run={}",
            self.config.cluster_id,
            self.config.provider,
            self.config.interval.as_secs(),
            self.config.dry_run
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    iteration += 1;
                    match self.run_pass(iteration).await {
                        Ok(report) => report.log(),
                        Err(e) => match self.config.failure_policy {
                            FailurePolicy::SkipPass => {
                                warn!("Pass {} abandoned, retrying next interval: {}", iteration, e);
                            }
                            FailurePolicy::Abort => {
                                error!("Pass {} failed, stopping: {}", iteration, e);
                                return Err(e);
                            }
                        },
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciliation shutting down after {} passes", iteration);
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One full convergence pass: registration, then deregistration.
    pub async fn run_pass(&self, iteration: u64) -> Result<PassReport, EngineError> {
        let span = info_span!("pass", cluster = %self.config.cluster_id, iteration);
        async {
            let mut report = PassReport::new(iteration, self.config.dry_run);
            self.register_services(&mut report).await?;
            self.deregister_stale(&mut report).await?;
            Ok::<_, EngineError>(report)
        }
        .instrument(span)
        .await
    }

    /// Registration step: add every running service this cluster has not
    /// registered yet.
    pub async fn register_services(&self, report: &mut PassReport) -> Result<(), EngineError> {
        self.remove_stranded(report).await;

        let services = self
            .orchestrator
            .list_services()
            .await
            .map_err(EngineError::at(Phase::ListServices))?;
        let entries = self
            .registry
            .list_entries()
            .await
            .map_err(EngineError::at(Phase::ListEntries))?;

        for service in &services {
            if service.is_system_service() {
                trace!("Skipping system service {}", service);
                continue;
            }

            if self.is_registered(service, &entries) {
                trace!("Service {} already registered", service);
                report.already_registered += 1;
                continue;
            }

            let endpoints = self
                .resolver
                .resolve(service, self.orchestrator.as_ref())
                .await
                .map_err(EngineError::at(Phase::ResolveEndpoints))?;

            if endpoints.is_empty() {
                debug!("Service {} has no reachable endpoints yet", service);
                report.unresolved += 1;
                continue;
            }

            info!(
                "Registering service {} [{}] with endpoints {:?}",
                service, self.config.cluster_id, endpoints
            );
            self.register_endpoints(service, endpoints, report).await?;
        }

        Ok(())
    }

    async fn register_endpoints(
        &self,
        service: &LogicalService,
        endpoints: Vec<ServiceEndpoint>,
        report: &mut PassReport,
    ) -> Result<(), EngineError> {
        let key = service.registry_key();
        let mut done: Vec<String> = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let id = Uuid::new_v4().to_string();
            let tags = OwnershipTags::new(
                service.name.as_str(),
                service.namespace.as_str(),
                self.config.cluster_id.as_str(),
                id.as_str(),
            )
            .encode();
            let request = RegistrationRequest {
                id,
                service: key.clone(),
                tags,
                endpoint,
            };

            if self.config.dry_run {
                info!("[dry-run] Would register {} at {}", key, request.endpoint);
                report.registered_endpoints += 1;
                continue;
            }

            match self.registry.register(&request).await {
                Ok(entry) => {
                    info!(
                        "Registered endpoint {} for service {} (ID={})",
                        request.endpoint, service, entry.id
                    );
                    report.registered_endpoints += 1;
                    done.push(entry.id);
                }
                Err(e) => {
                    self.roll_back(service, &done, report).await;
                    return Err(EngineError::Source {
                        phase: Phase::Register,
                        source: e,
                    });
                }
            }
        }

        report.registered_services += 1;
        Ok(())
    }

    /// Remove the entries of a half-registered service so the next pass
    /// finds it absent and registers the whole set again. Entries that
    /// cannot be removed now are retried at the start of every later pass.
    async fn roll_back(&self, service: &LogicalService, ids: &[String], report: &mut PassReport) {
        let mut failed = Vec::new();
        for id in ids {
            match self.registry.deregister(id).await {
                Ok(()) => {
                    debug!("Rolled back entry {} of service {}", id, service);
                    report.registered_endpoints = report.registered_endpoints.saturating_sub(1);
                }
                Err(e) => {
                    warn!(
                        "Could not roll back entry {} of service {}: {}",
                        id, service, e
                    );
                    failed.push(id.clone());
                }
            }
        }

        if !failed.is_empty() {
            error!(
                "Service {} is partially registered; entries {:?} will be removed on the next pass",
                service, failed
            );
            lock(&self.stranded).extend(failed);
        }
    }

    /// Retry removing entries left behind by an earlier failed rollback
    async fn remove_stranded(&self, report: &mut PassReport) {
        let ids = std::mem::take(&mut *lock(&self.stranded));
        if ids.is_empty() {
            return;
        }

        let mut remaining = Vec::new();
        for id in ids {
            match self.registry.deregister(&id).await {
                Ok(()) => {
                    info!("Removed stranded entry {}", id);
                    report.deregistered += 1;
                }
                Err(e) => {
                    error!("Stranded entry {} still present: {}", id, e);
                    remaining.push(id);
                }
            }
        }
        lock(&self.stranded).extend(remaining);
    }

    /// Ids still waiting for a successful rollback
    pub fn stranded(&self) -> Vec<String> {
        lock(&self.stranded).clone()
    }

    fn is_registered(&self, service: &LogicalService, entries: &[RegistryEntry]) -> bool {
        let key = service.registry_key();
        let wanted = identity_tags(&service.name, &service.namespace, &self.config.cluster_id);
        entries
            .iter()
            .any(|entry| entry.service == key && contains_all(&entry.tags, &wanted))
    }

    /// Deregistration step: drop entries this cluster owns whose service is
    /// gone. Entries of other clusters and undecodable entries are untouched.
    pub async fn deregister_stale(&self, report: &mut PassReport) -> Result<(), EngineError> {
        let entries = self
            .registry
            .list_entries()
            .await
            .map_err(EngineError::at(Phase::ListEntries))?;

        for entry in &entries {
            if entry.is_system_entry() {
                continue;
            }

            let owner = OwnershipTags::decode(&entry.tags);
            if !owner.is_owned_by(&self.config.cluster_id) {
                trace!("Entry {} belongs to cluster {:?}", entry.id, owner.cluster);
                report.foreign += 1;
                continue;
            }

            if owner.name.is_empty() || owner.namespace.is_empty() {
                debug!(
                    "Entry {} has incomplete ownership tags {:?}, leaving it alone",
                    entry.id, entry.tags
                );
                report.undecodable += 1;
                continue;
            }

            let running = self
                .orchestrator
                .is_running(&owner.name, &owner.namespace)
                .await
                .map_err(EngineError::at(Phase::CheckRunning))?;
            if running {
                continue;
            }

            if self.config.dry_run {
                info!(
                    "[dry-run] Would deregister {}/{} (ID={})",
                    owner.namespace, owner.name, entry.id
                );
                report.deregistered += 1;
                continue;
            }

            info!(
                "Deregistering service {}/{} [{}] (ID={})",
                owner.namespace, owner.name, owner.cluster, entry.id
            );
            self.registry
                .deregister(&entry.id)
                .await
                .map_err(EngineError::at(Phase::Deregister))?;
            report.deregistered += 1;
        }

        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Spawn the engine loop as a background task.
///
/// Returns the shutdown sender and the task handle carrying the loop result.
pub fn spawn_engine(
    engine: ReconciliationEngine,
) -> (watch::Sender<bool>, JoinHandle<Result<(), EngineError>>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { engine.run(shutdown_rx).await });
    (shutdown_tx, handle)
}

#[cfg(test)]
mod tests;
