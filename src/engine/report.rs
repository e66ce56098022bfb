//! Per-pass outcome summary

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

/// What one convergence pass did
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub iteration: u64,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Services that got all of their endpoints registered
    pub registered_services: u32,
    pub registered_endpoints: u32,
    /// Services skipped because this cluster already has an entry for them
    pub already_registered: u32,
    /// Services with no reachable endpoint (yet)
    pub unresolved: u32,
    pub deregistered: u32,
    /// Entries owned by other clusters
    pub foreign: u32,
    /// Entries of this cluster whose tags lack a name or namespace
    pub undecodable: u32,
}

impl PassReport {
    pub fn new(iteration: u64, dry_run: bool) -> Self {
        Self {
            iteration,
            started_at: Utc::now(),
            dry_run,
            registered_services: 0,
            registered_endpoints: 0,
            already_registered: 0,
            unresolved: 0,
            deregistered: 0,
            foreign: 0,
            undecodable: 0,
        }
    }

    /// True if the pass changed nothing in the registry
    pub fn is_noop(&self) -> bool {
        self.registered_endpoints == 0 && self.deregistered == 0
    }

    pub fn log(&self) {
        let elapsed_ms = (Utc::now() - self.started_at).num_milliseconds();
        if self.is_noop() {
            debug!(
                "Pass {} converged in {}ms: {} registered services, {} pending, {} foreign entries",
                self.iteration, elapsed_ms, self.already_registered, self.unresolved, self.foreign
            );
        } else {
            info!(
                "Pass {} done in {}ms{}: registered {} endpoints for {} services, deregistered {} entries",
                self.iteration,
                elapsed_ms,
                if self.dry_run { " (dry-run)" } else { "" },
                self.registered_endpoints,
                self.registered_services,
                self.deregistered
            );
        }
    }
}
