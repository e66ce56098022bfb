//! Node address selection for node-port services

use tracing::debug;

use crate::model::{AddressClass, NodeAddresses};

/// Pick the node addresses to advertise.
///
/// External addresses are used only when every node has at least one;
/// otherwise all internal addresses are returned. Mixing classes would give a
/// set where some endpoints are unreachable from outside the cluster.
pub fn select_node_addresses(nodes: &[NodeAddresses]) -> Vec<String> {
    let all_external = nodes.iter().all(|node| {
        node.addresses
            .iter()
            .any(|record| record.class == AddressClass::External)
    });

    let wanted = if all_external {
        AddressClass::External
    } else {
        AddressClass::Internal
    };

    let selected: Vec<String> = nodes
        .iter()
        .flat_map(|node| node.addresses.iter())
        .filter(|record| record.class == wanted)
        .map(|record| record.address.clone())
        .collect();

    debug!("Selected {:?} node addresses: {:?}", wanted, selected);
    selected
}
