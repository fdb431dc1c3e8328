//! Mapping upgrade stories
//!
//! A software build declares one mapping version per descriptor. Whatever
//! the index holds, one reconciliation cycle must leave it at the declared
//! version or, when newer software wrote it, exactly as it was.

use std::collections::BTreeMap;

use system_index_manager::cluster::{ClusterStateProvider, ClusterStateReader};
use system_index_manager::controller::IndexOutcome;
use system_index_manager::dispatcher::IndexAdminClient;

use super::helpers::*;

// =============================================================================
// Stale Mappings
// =============================================================================

/// Story: an index created by the previous release is upgraded in one cycle
///
/// The index holds v1 mappings and no settings. After one notification and
/// the completion of the dispatched update, both mappings and settings
/// match the v2 descriptor.
#[tokio::test]
async fn story_stale_index_is_upgraded_in_one_cycle() {
    let cluster = cluster_with_index(1);
    let manager = manager(&cluster, 2);

    let report = manager.on_cluster_state_changed();
    assert_eq!(report.outcome(PRIMARY_INDEX), Some(&IndexOutcome::Dispatched));
    settle(&manager).await;

    assert_mappings_and_settings(&cluster, 2);
    assert_eq!(cluster.mapping_updates(PRIMARY_INDEX), 1);
    assert!(manager.in_flight().is_empty());

    // The mutation's own state change finds nothing left to do
    let report = manager.on_cluster_state_changed();
    assert_eq!(report.outcome(PRIMARY_INDEX), Some(&IndexOutcome::UpToDate));
}

/// Story: a fresh cluster created without the version marker is upgraded
#[tokio::test]
async fn story_unversioned_mappings_count_as_oldest() {
    let cluster = empty_cluster();
    cluster.create_index(
        PRIMARY_INDEX,
        serde_json::json!({ "properties": {} }),
        declared_settings(),
    );
    let manager = manager(&cluster, 1);

    assert_eq!(manager.on_cluster_state_changed().dispatched(), 1);
    settle(&manager).await;
    assert_mappings_and_settings(&cluster, 1);
}

/// Story: a rolling upgrade walks the index through every release
///
/// Each release replaces the manager; every step lands on that release's
/// version and the version observed in cluster state never goes backwards.
#[tokio::test]
async fn story_successive_releases_only_move_forward() {
    let cluster = cluster_with_index(1);
    let mut observed = Vec::new();

    for release in 2..=5 {
        let manager = manager(&cluster, release);
        manager.on_cluster_state_changed();
        settle(&manager).await;
        observed.push(
            cluster
                .snapshot()
                .current_mapping_version(PRIMARY_INDEX)
                .expect("marker present"),
        );
    }

    assert_eq!(observed, vec![2, 3, 4, 5]);
    assert_eq!(cluster.mapping_updates(PRIMARY_INDEX), 4);
    assert_mappings_and_settings(&cluster, 5);
}

// =============================================================================
// Newer Mappings
// =============================================================================

/// Story: an older node elected master never downgrades
///
/// During a rolling upgrade a node on the previous release can win the
/// election after newer software already upgraded the index. However many
/// notifications it sees, the v3 mappings stay untouched.
#[tokio::test]
async fn story_older_master_leaves_newer_mappings_alone() {
    let cluster = cluster_with_index(3);
    cluster
        .put_settings(PRIMARY_INDEX, &declared_settings())
        .await
        .expect("settings applied");
    let manager = manager(&cluster, 2);

    for _ in 0..20 {
        cluster.touch();
        let report = manager.on_cluster_state_changed();
        assert_eq!(report.outcome(PRIMARY_INDEX), Some(&IndexOutcome::AlreadyNewer));
    }
    settle(&manager).await;

    assert_eq!(cluster.mapping_updates(PRIMARY_INDEX), 0);
    assert_eq!(cluster.mappings(PRIMARY_INDEX), Some(mappings(3)));
}

/// Settings are enforced even when the mappings are ahead
#[tokio::test]
async fn test_settings_drift_on_newer_index_is_corrected() {
    let cluster = cluster_with_index(3);
    let manager = manager(&cluster, 2);

    assert_eq!(manager.on_cluster_state_changed().dispatched(), 1);
    settle(&manager).await;

    assert_eq!(cluster.mapping_updates(PRIMARY_INDEX), 0);
    assert_eq!(cluster.mappings(PRIMARY_INDEX), Some(mappings(3)));
    let settings = cluster.settings(PRIMARY_INDEX).expect("index exists");
    for (name, value) in declared_settings() {
        assert_eq!(settings.get(&name), Some(&value));
    }
}

// =============================================================================
// Current Mappings
// =============================================================================

/// An index already at the declared version and settings is never touched
#[tokio::test]
async fn test_converged_index_sees_no_mutations() {
    let cluster = cluster_with_index(2);
    cluster
        .put_settings(PRIMARY_INDEX, &declared_settings())
        .await
        .expect("settings applied");
    let before = cluster.mutations().len();
    let manager = manager(&cluster, 2);

    for _ in 0..5 {
        let report = manager.on_cluster_state_changed();
        assert_eq!(report.outcome(PRIMARY_INDEX), Some(&IndexOutcome::UpToDate));
    }
    assert_eq!(cluster.mutations().len(), before);
}

/// Unrelated settings on the index are left in place by a settings update
#[tokio::test]
async fn test_settings_update_keeps_unmanaged_settings() {
    let cluster = empty_cluster();
    cluster.create_index(
        PRIMARY_INDEX,
        mappings(2),
        BTreeMap::from([("index.refresh_interval".to_string(), "5s".to_string())]),
    );
    let manager = manager(&cluster, 2);

    manager.on_cluster_state_changed();
    settle(&manager).await;

    let settings = cluster.settings(PRIMARY_INDEX).expect("index exists");
    assert_eq!(settings.get("index.refresh_interval").map(String::as_str), Some("5s"));
    assert_mappings_and_settings(&cluster, 2);
}
