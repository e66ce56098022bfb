//! HTTP clients for the two external systems

pub mod consul;
pub mod kubernetes;

pub use consul::ConsulClient;
pub use kubernetes::KubernetesClient;
