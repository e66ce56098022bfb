//! Endpoint derivation
//!
//! Turns a logical service into the concrete (address, port) pairs that get
//! advertised in the registry. Everything here is pure except
//! [`EndpointResolver::resolve`], which fetches node addresses on demand.

pub mod endpoint;
pub mod node_address;

pub use endpoint::{resolve_endpoints, CloudProvider, EndpointResolver};
pub use node_address::select_node_addresses;
