//! # kube2registry
//!
//! Keeps a Consul service registry in sync with the services running on a
//! Kubernetes cluster. Several clusters can share one registry: every entry
//! carries a `kube` ownership tag and each cluster only ever removes its own
//! entries.

pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod model;
pub mod resolver;
pub mod source;
pub mod tags;
