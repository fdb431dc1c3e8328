//! Shared fixtures for the reconciliation scenarios

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use system_index_manager::cluster::InMemoryCluster;
use system_index_manager::config::ManagerConfig;
use system_index_manager::controller::SystemIndexManager;
use system_index_manager::descriptor::{DescriptorRegistry, SystemIndexDescriptor};
use system_index_manager::MAPPING_VERSION_META_KEY;

/// Managed index pattern used by every scenario
pub const INDEX_PATTERN: &str = ".test-index*";

/// Concrete index holding the writable mapping
pub const PRIMARY_INDEX: &str = ".test-index-1";

/// Alias fronting the primary
pub const ALIAS: &str = ".test-index";

/// How long a scenario waits for updates to settle
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings every descriptor version declares
pub fn declared_settings() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("index.number_of_replicas".to_string(), "0".to_string()),
        ("index.auto_expand_replicas".to_string(), "0-1".to_string()),
    ])
}

/// Mapping document for the given version
///
/// Version 1 carries a single field; later versions add one field each.
pub fn mappings(version: u64) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert("some_field".to_string(), json!({ "type": "keyword" }));
    for v in 2..=version {
        properties.insert(format!("field_v{v}"), json!({ "type": "keyword" }));
    }
    json!({
        "_meta": { MAPPING_VERSION_META_KEY: version },
        "properties": properties
    })
}

/// Descriptor as shipped by a software build declaring `version`
pub fn descriptor(version: u64) -> SystemIndexDescriptor {
    SystemIndexDescriptor::builder()
        .index_pattern(INDEX_PATTERN)
        .primary_index(PRIMARY_INDEX)
        .alias(ALIAS)
        .description("Test system index")
        .mappings(mappings(version))
        .settings(declared_settings())
        .build()
        .expect("test descriptor is valid")
}

/// Registry holding the test descriptor at `version`
pub fn registry(version: u64) -> Arc<DescriptorRegistry> {
    Arc::new(DescriptorRegistry::from_descriptors([descriptor(version)]).expect("no overlap"))
}

/// Cluster with no indices
pub fn empty_cluster() -> Arc<InMemoryCluster> {
    Arc::new(InMemoryCluster::default())
}

/// Cluster holding the primary index, created with mappings at `version`
pub fn cluster_with_index(version: u64) -> Arc<InMemoryCluster> {
    let cluster = empty_cluster();
    cluster.create_index(PRIMARY_INDEX, mappings(version), BTreeMap::new());
    cluster
}

/// Manager running a software build that declares `version`
pub fn manager(cluster: &Arc<InMemoryCluster>, version: u64) -> Arc<SystemIndexManager> {
    manager_with_config(cluster, version, ManagerConfig::default())
}

/// Manager with explicit configuration
pub fn manager_with_config(
    cluster: &Arc<InMemoryCluster>,
    version: u64,
    config: ManagerConfig,
) -> Arc<SystemIndexManager> {
    Arc::new(SystemIndexManager::new(
        registry(version),
        cluster.clone(),
        cluster.clone(),
        config,
    ))
}

/// Wait for every outstanding update to complete
pub async fn settle(manager: &SystemIndexManager) {
    tokio::time::timeout(SETTLE_TIMEOUT, manager.wait_idle())
        .await
        .expect("updates settle");
}

/// Assert the primary carries exactly the mappings and settings of `version`
pub fn assert_mappings_and_settings(cluster: &InMemoryCluster, version: u64) {
    assert_eq!(
        cluster.mappings(PRIMARY_INDEX),
        Some(mappings(version)),
        "mappings of {PRIMARY_INDEX} should match version {version}"
    );
    let settings = cluster.settings(PRIMARY_INDEX).expect("index exists");
    for (name, value) in declared_settings() {
        assert_eq!(settings.get(&name), Some(&value), "setting {name}");
    }
}
