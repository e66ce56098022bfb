use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::model::{
    ExposureMode, IngressPoint, LogicalService, NodeAddressRecord, NodeAddresses, RegistryEntry,
    ServicePort,
};
use crate::source::memory::{InMemoryOrchestrator, InMemoryRegistry};
use crate::tags::OwnershipTags;

const CLUSTER: &str = "cluster-1";

fn api_service() -> LogicalService {
    LogicalService::new("api", "prod", ExposureMode::ClusterLocal)
        .with_cluster_ip("10.0.0.5")
        .with_port(ServicePort {
            port: 80,
            target_port: 8080,
            node_port: None,
        })
}

fn node_port_service() -> LogicalService {
    LogicalService::new("web", "prod", ExposureMode::NodePort).with_port(ServicePort {
        port: 80,
        target_port: 8080,
        node_port: Some(30080),
    })
}

fn three_nodes() -> Vec<NodeAddresses> {
    (1..=3)
        .map(|i| {
            NodeAddresses::new(
                format!("n{}", i),
                vec![NodeAddressRecord::internal(format!("10.1.0.{}", i))],
            )
        })
        .collect()
}

fn entry(id: &str, name: &str, ns: &str, cluster: &str) -> RegistryEntry {
    RegistryEntry {
        id: id.to_string(),
        service: crate::model::registry_key(name, ns),
        tags: OwnershipTags::new(name, ns, cluster, id).encode(),
        address: "10.0.0.1".to_string(),
        port: 80,
    }
}

fn consul_self_entry() -> RegistryEntry {
    RegistryEntry {
        id: "consul".to_string(),
        service: "consul".to_string(),
        tags: vec![],
        address: String::new(),
        port: 8300,
    }
}

struct Harness {
    orchestrator: Arc<InMemoryOrchestrator>,
    registry: Arc<InMemoryRegistry>,
    engine: ReconciliationEngine,
}

fn harness(services: Vec<LogicalService>, entries: Vec<RegistryEntry>) -> Harness {
    harness_with(services, entries, EngineConfig::new(CLUSTER, CloudProvider::Aws))
}

fn harness_with(
    services: Vec<LogicalService>,
    entries: Vec<RegistryEntry>,
    config: EngineConfig,
) -> Harness {
    let orchestrator = Arc::new(InMemoryOrchestrator::with_services(services));
    let registry = Arc::new(InMemoryRegistry::with_entries(entries));
    let engine = ReconciliationEngine::new(config, orchestrator.clone(), registry.clone());
    Harness {
        orchestrator,
        registry,
        engine,
    }
}

#[tokio::test]
async fn test_registers_cluster_local_service() {
    let h = harness(vec![api_service()], vec![]);

    let report = h.engine.run_pass(1).await.unwrap();
    assert_eq!(report.registered_services, 1);
    assert_eq!(report.registered_endpoints, 1);

    let registered = h.registry.registered();
    assert_eq!(registered.len(), 1);
    let request = &registered[0];
    assert_eq!(request.service, "api-prod");
    assert_eq!(request.endpoint.address, "10.0.0.5");
    assert_eq!(request.endpoint.port, 8080);
    assert_eq!(request.tags.len(), 4);
    assert_eq!(&request.tags[..3], &["name=api", "ns=prod", "kube=cluster-1"]);
    assert_eq!(request.tags[3], format!("id={}", request.id));
}

#[tokio::test]
async fn test_second_registration_pass_is_noop() {
    let h = harness(vec![api_service(), node_port_service()], vec![]);
    h.orchestrator.set_nodes(three_nodes());

    let first = h.engine.run_pass(1).await.unwrap();
    assert_eq!(first.registered_endpoints, 4);

    let second = h.engine.run_pass(2).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(second.already_registered, 2);
    assert_eq!(h.registry.registered().len(), 4);
    assert_eq!(h.registry.entries().len(), 4);
}

#[tokio::test]
async fn test_node_port_entries_share_identity_with_distinct_ids() {
    let h = harness(vec![node_port_service()], vec![]);
    h.orchestrator.set_nodes(three_nodes());

    h.engine.run_pass(1).await.unwrap();

    let entries = h.registry.entries();
    assert_eq!(entries.len(), 3);
    let mut ids: Vec<_> = entries.iter().map(|e| e.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);

    for e in &entries {
        let owner = OwnershipTags::decode(&e.tags);
        assert_eq!(owner.name, "web");
        assert_eq!(owner.namespace, "prod");
        assert_eq!(owner.cluster, CLUSTER);
        assert_eq!(owner.id, e.id);
        assert_eq!(e.port, 30080);
    }
}

#[tokio::test]
async fn test_skips_system_services() {
    let services = vec![
        LogicalService::new("kube-dns", "kube-system", ExposureMode::ClusterLocal)
            .with_cluster_ip("10.96.0.10")
            .with_port(ServicePort {
                port: 53,
                target_port: 53,
                node_port: None,
            }),
        LogicalService::new("kubernetes", "default", ExposureMode::ClusterLocal)
            .with_cluster_ip("10.96.0.1")
            .with_port(ServicePort {
                port: 443,
                target_port: 6443,
                node_port: None,
            }),
        LogicalService::new("consul-server", "consul", ExposureMode::ClusterLocal)
            .with_cluster_ip("10.96.0.20")
            .with_port(ServicePort {
                port: 8500,
                target_port: 8500,
                node_port: None,
            }),
    ];
    let h = harness(services, vec![]);

    let report = h.engine.run_pass(1).await.unwrap();
    assert!(report.is_noop());
    assert!(h.registry.registered().is_empty());
}

#[tokio::test]
async fn test_unresolved_service_is_not_registered() {
    // Load balancer without ingress yet
    let lb = LogicalService::new("edge", "prod", ExposureMode::LoadBalancer);
    let h = harness(vec![lb], vec![]);

    let report = h.engine.run_pass(1).await.unwrap();
    assert_eq!(report.unresolved, 1);
    assert!(h.registry.registered().is_empty());
}

#[tokio::test]
async fn test_load_balancer_registered_once_populated() {
    let lb = LogicalService::new("edge", "prod", ExposureMode::LoadBalancer);
    let h = harness(vec![lb.clone()], vec![]);
    h.engine.run_pass(1).await.unwrap();
    assert!(h.registry.entries().is_empty());

    h.orchestrator.remove_service("edge", "prod");
    h.orchestrator.add_service(lb.with_ingress(IngressPoint {
        ip: None,
        hostname: Some("lb.example.com".to_string()),
    }));
    h.engine.run_pass(2).await.unwrap();

    let entries = h.registry.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].address, "lb.example.com");
    assert_eq!(entries[0].port, 80);
}

#[tokio::test]
async fn test_existing_entry_of_other_cluster_does_not_count() {
    let h = harness(
        vec![api_service()],
        vec![entry("foreign-1", "api", "prod", "cluster-2")],
    );

    h.engine.run_pass(1).await.unwrap();
    assert_eq!(h.registry.registered().len(), 1);
    assert_eq!(h.registry.entries().len(), 2);
}

#[tokio::test]
async fn test_deregisters_removed_service() {
    let h = harness(vec![api_service()], vec![]);
    h.engine.run_pass(1).await.unwrap();
    let id = h.registry.entries()[0].id.clone();

    h.orchestrator.remove_service("api", "prod");
    let report = h.engine.run_pass(2).await.unwrap();

    assert_eq!(report.deregistered, 1);
    assert_eq!(h.registry.deregistered(), vec![id]);
    assert!(h.registry.entries().is_empty());
}

#[tokio::test]
async fn test_second_deregistration_pass_is_noop() {
    let h = harness(vec![], vec![entry("stale", "old", "prod", CLUSTER)]);

    let first = h.engine.run_pass(1).await.unwrap();
    assert_eq!(first.deregistered, 1);

    let second = h.engine.run_pass(2).await.unwrap();
    assert_eq!(second.deregistered, 0);
    assert_eq!(h.registry.deregistered().len(), 1);
}

#[tokio::test]
async fn test_never_deregisters_foreign_entries() {
    let h = harness(
        vec![],
        vec![
            entry("a", "api", "prod", "cluster-2"),
            entry("b", "api", "prod", "cluster-10"),
            entry("c", "api", "prod", "cluster-1x"),
        ],
    );

    let report = h.engine.run_pass(1).await.unwrap();
    assert_eq!(report.foreign, 3);
    assert!(h.registry.deregistered().is_empty());
    assert_eq!(h.registry.entries().len(), 3);
}

#[tokio::test]
async fn test_registry_self_entry_untouched() {
    let h = harness(vec![api_service()], vec![consul_self_entry()]);

    h.engine.run_pass(1).await.unwrap();
    h.engine.run_pass(2).await.unwrap();

    assert!(h.registry.deregistered().is_empty());
    assert!(h
        .registry
        .registered()
        .iter()
        .all(|r| r.service != "consul"));
    assert!(h.registry.entries().iter().any(|e| e.id == "consul"));
}

#[tokio::test]
async fn test_entries_with_incomplete_tags_left_alone() {
    let untagged = RegistryEntry {
        id: "manual".to_string(),
        service: "legacy".to_string(),
        tags: vec!["team=payments".to_string()],
        address: "10.0.0.9".to_string(),
        port: 9000,
    };
    let half_tagged = RegistryEntry {
        id: "half".to_string(),
        service: "legacy".to_string(),
        tags: vec![format!("kube={}", CLUSTER)],
        address: "10.0.0.9".to_string(),
        port: 9000,
    };
    let h = harness(vec![], vec![untagged, half_tagged]);

    let report = h.engine.run_pass(1).await.unwrap();
    assert_eq!(report.undecodable, 1);
    assert_eq!(report.foreign, 1);
    assert!(h.registry.deregistered().is_empty());
}

#[tokio::test]
async fn test_externally_removed_entry_is_re_registered() {
    let h = harness(vec![api_service()], vec![]);
    h.engine.run_pass(1).await.unwrap();
    let id = h.registry.entries()[0].id.clone();

    h.registry.remove(&id);
    h.engine.run_pass(2).await.unwrap();

    let entries = h.registry.entries();
    assert_eq!(entries.len(), 1);
    assert_ne!(entries[0].id, id);
}

#[tokio::test]
async fn test_orchestrator_failure_abandons_pass() {
    let h = harness(vec![api_service()], vec![entry("stale", "old", "prod", CLUSTER)]);
    h.orchestrator.set_unavailable(true);

    let err = h.engine.run_pass(1).await.unwrap_err();
    assert_eq!(err.phase(), Phase::ListServices);
    assert!(h.registry.registered().is_empty());
    assert!(h.registry.deregistered().is_empty());

    h.orchestrator.set_unavailable(false);
    let report = h.engine.run_pass(2).await.unwrap();
    assert_eq!(report.registered_endpoints, 1);
    assert_eq!(report.deregistered, 1);
}

#[tokio::test]
async fn test_node_lookup_failure_reported() {
    let h = harness(vec![node_port_service()], vec![]);
    h.orchestrator.set_nodes_unavailable(true);

    let err = h.engine.run_pass(1).await.unwrap_err();
    assert_eq!(err.phase(), Phase::ResolveEndpoints);
}

#[tokio::test]
async fn test_partial_registration_rolled_back_and_healed() {
    let h = harness(vec![node_port_service()], vec![]);
    h.orchestrator.set_nodes(three_nodes());
    h.registry.fail_register_after(Some(2));

    let err = h.engine.run_pass(1).await.unwrap_err();
    assert_eq!(err.phase(), Phase::Register);
    assert_eq!(h.registry.registered().len(), 2);
    assert_eq!(h.registry.deregistered().len(), 2);
    assert!(h.registry.entries().is_empty());

    h.registry.fail_register_after(None);
    let report = h.engine.run_pass(2).await.unwrap();
    assert_eq!(report.registered_endpoints, 3);
    assert_eq!(h.registry.entries().len(), 3);
}

#[tokio::test]
async fn test_failed_rollback_is_retried_next_pass() {
    let h = harness(vec![node_port_service()], vec![]);
    h.orchestrator.set_nodes(three_nodes());
    h.registry.fail_register_after(Some(1));
    h.registry.set_deregister_failing(true);

    assert!(h.engine.run_pass(1).await.is_err());
    let leftover = h.registry.entries();
    assert_eq!(leftover.len(), 1);
    assert_eq!(h.engine.stranded(), vec![leftover[0].id.clone()]);

    // Registry still refuses removals: the leftover stays queued
    h.registry.fail_register_after(None);
    h.engine.run_pass(2).await.unwrap();
    assert_eq!(h.engine.stranded().len(), 1);

    h.registry.set_deregister_failing(false);
    let report = h.engine.run_pass(3).await.unwrap();
    assert!(h.engine.stranded().is_empty());
    assert_eq!(h.registry.deregistered(), vec![leftover[0].id.clone()]);
    assert_eq!(report.registered_endpoints, 3);
    assert_eq!(h.registry.entries().len(), 3);
}

#[tokio::test]
async fn test_dry_run_makes_no_calls() {
    let config = EngineConfig::new(CLUSTER, CloudProvider::Aws).with_dry_run(true);
    let h = harness_with(
        vec![api_service()],
        vec![entry("stale", "old", "prod", CLUSTER)],
        config,
    );

    let report = h.engine.run_pass(1).await.unwrap();
    assert_eq!(report.registered_endpoints, 1);
    assert_eq!(report.deregistered, 1);
    assert!(h.registry.registered().is_empty());
    assert!(h.registry.deregistered().is_empty());
    assert_eq!(h.registry.entries().len(), 1);
}

#[tokio::test]
async fn test_run_loop_skips_failed_pass_and_stops_on_shutdown() {
    let config = EngineConfig::new(CLUSTER, CloudProvider::Aws)
        .with_interval(Duration::from_millis(20));
    let h = harness_with(vec![api_service()], vec![], config);
    h.registry.set_unavailable(true);

    let registry = h.registry.clone();
    let (shutdown, handle) = spawn_engine(h.engine);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(registry.registered().is_empty());

    registry.set_unavailable(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.entries().len(), 1);

    shutdown.send(true).unwrap();
    let result = handle.await.unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_run_loop_aborts_under_abort_policy() {
    let config = EngineConfig::new(CLUSTER, CloudProvider::Aws)
        .with_interval(Duration::from_millis(20))
        .with_failure_policy(FailurePolicy::Abort);
    let h = harness_with(vec![api_service()], vec![], config);
    h.registry.set_unavailable(true);

    let (_shutdown, handle) = spawn_engine(h.engine);
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("engine did not stop")
        .unwrap();

    let err = result.unwrap_err();
    assert_eq!(err.phase(), Phase::ListEntries);
}

#[test]
fn test_engine_config_defaults() {
    let config = EngineConfig::new(CLUSTER, CloudProvider::Openstack);
    assert_eq!(config.interval, Duration::from_secs(DEFAULT_INTERVAL_SECS));
    assert_eq!(config.failure_policy, FailurePolicy::SkipPass);
    assert!(!config.dry_run);
}
