//! End-to-end convergence over in-memory orchestrator and registry
//!
//! Two clusters share one registry; each must only ever touch its own entries.

use std::sync::Arc;

use kube2registry::engine::{EngineConfig, ReconciliationEngine};
use kube2registry::model::{
    ExposureMode, IngressPoint, LogicalService, NodeAddressRecord, NodeAddresses, RegistryEntry,
    ServicePort,
};
use kube2registry::resolver::CloudProvider;
use kube2registry::source::memory::{InMemoryOrchestrator, InMemoryRegistry};
use kube2registry::tags::OwnershipTags;

fn api() -> LogicalService {
    LogicalService::new("api", "prod", ExposureMode::ClusterLocal)
        .with_cluster_ip("10.0.0.5")
        .with_port(ServicePort {
            port: 8080,
            target_port: 8080,
            node_port: None,
        })
}

fn engine(
    cluster: &str,
    provider: CloudProvider,
    orchestrator: Arc<InMemoryOrchestrator>,
    registry: Arc<InMemoryRegistry>,
) -> ReconciliationEngine {
    ReconciliationEngine::new(EngineConfig::new(cluster, provider), orchestrator, registry)
}

fn owner(entry: &RegistryEntry) -> OwnershipTags {
    OwnershipTags::decode(&entry.tags)
}

#[tokio::test]
async fn test_register_then_deregister_cluster_local_service() {
    let orchestrator = Arc::new(InMemoryOrchestrator::with_services(vec![api()]));
    let registry = Arc::new(InMemoryRegistry::new());
    let engine = engine(
        "cluster-1",
        CloudProvider::Aws,
        orchestrator.clone(),
        registry.clone(),
    );

    engine.run_pass(1).await.unwrap();

    let entries = registry.entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.service, "api-prod");
    assert_eq!(entry.address, "10.0.0.5");
    assert_eq!(entry.port, 8080);
    assert_eq!(
        entry.tags,
        vec![
            "name=api".to_string(),
            "ns=prod".to_string(),
            "kube=cluster-1".to_string(),
            format!("id={}", entry.id),
        ]
    );

    orchestrator.remove_service("api", "prod");
    let report = engine.run_pass(2).await.unwrap();

    assert_eq!(report.deregistered, 1);
    assert!(registry.entries().is_empty());
}

#[tokio::test]
async fn test_two_clusters_share_registry() {
    let registry = Arc::new(InMemoryRegistry::new());

    let east_nodes = vec![
        NodeAddresses::new(
            "east-1",
            vec![
                NodeAddressRecord::internal("10.1.0.1"),
                NodeAddressRecord::external("54.1.0.1"),
            ],
        ),
        NodeAddresses::new(
            "east-2",
            vec![
                NodeAddressRecord::internal("10.1.0.2"),
                NodeAddressRecord::external("54.1.0.2"),
            ],
        ),
    ];
    let east = Arc::new(InMemoryOrchestrator::with_services(vec![
        api(),
        LogicalService::new("web", "prod", ExposureMode::NodePort).with_port(ServicePort {
            port: 80,
            target_port: 8080,
            node_port: Some(30080),
        }),
    ]));
    east.set_nodes(east_nodes);

    let west = Arc::new(InMemoryOrchestrator::with_services(vec![
        api(),
        LogicalService::new("edge", "prod", ExposureMode::LoadBalancer)
            .with_ingress(IngressPoint {
                ip: Some("10.20.0.4".to_string()),
                hostname: None,
            })
            .with_ingress(IngressPoint {
                ip: Some("172.24.4.10".to_string()),
                hostname: None,
            }),
    ]));

    let east_engine = engine("east", CloudProvider::Aws, east.clone(), registry.clone());
    let west_engine = engine(
        "west",
        CloudProvider::Openstack,
        west.clone(),
        registry.clone(),
    );

    east_engine.run_pass(1).await.unwrap();
    west_engine.run_pass(1).await.unwrap();

    let entries = registry.entries();
    let east_entries: Vec<_> = entries.iter().filter(|e| owner(e).cluster == "east").collect();
    let west_entries: Vec<_> = entries.iter().filter(|e| owner(e).cluster == "west").collect();
    // api + web on both external node addresses
    assert_eq!(east_entries.len(), 3);
    // api + edge on the second ingress IP
    assert_eq!(west_entries.len(), 2);
    assert!(west_entries
        .iter()
        .any(|e| e.service == "edge-prod" && e.address == "172.24.4.10" && e.port == 80));
    assert!(east_entries
        .iter()
        .filter(|e| e.service == "web-prod")
        .all(|e| e.address.starts_with("54.1.0.") && e.port == 30080));

    // The service disappears from west only; east keeps its entry
    west.remove_service("api", "prod");
    west_engine.run_pass(2).await.unwrap();
    east_engine.run_pass(2).await.unwrap();

    let remaining = registry.entries();
    assert!(remaining
        .iter()
        .any(|e| e.service == "api-prod" && owner(e).cluster == "east"));
    assert!(!remaining
        .iter()
        .any(|e| e.service == "api-prod" && owner(e).cluster == "west"));

    // Nothing else changes on further passes
    let before = registry.entries().len();
    let east_report = east_engine.run_pass(3).await.unwrap();
    let west_report = west_engine.run_pass(3).await.unwrap();
    assert!(east_report.is_noop());
    assert!(west_report.is_noop());
    assert_eq!(registry.entries().len(), before);
}

#[tokio::test]
async fn test_foreign_entry_survives_even_when_service_absent() {
    let foreign = RegistryEntry {
        id: "other".to_string(),
        service: "billing-prod".to_string(),
        tags: OwnershipTags::new("billing", "prod", "cluster-2", "other").encode(),
        address: "10.9.0.1".to_string(),
        port: 443,
    };
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let registry = Arc::new(InMemoryRegistry::with_entries(vec![foreign]));
    let engine = engine("cluster-1", CloudProvider::Aws, orchestrator, registry.clone());

    for i in 1..=3 {
        engine.run_pass(i).await.unwrap();
    }

    assert_eq!(registry.entries().len(), 1);
    assert!(registry.deregistered().is_empty());
}
