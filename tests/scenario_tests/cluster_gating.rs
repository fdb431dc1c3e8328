//! Cluster gating stories
//!
//! Only the elected master of a recovered cluster mutates system indices,
//! and only indices that are open with their primaries allocated.

use system_index_manager::cluster::{IndexHealth, IndexState};
use system_index_manager::controller::{IndexOutcome, SkipReason};

use super::helpers::*;

/// Story: followers observe but never mutate
///
/// Every node runs a manager against the same cluster. Until the local
/// node wins the election nothing is dispatched; afterwards the next
/// change upgrades the index.
#[tokio::test]
async fn story_only_elected_master_mutates() {
    let cluster = cluster_with_index(1);
    cluster.set_master(false);
    let manager = manager(&cluster, 2);

    for _ in 0..5 {
        cluster.touch();
        let report = manager.on_cluster_state_changed();
        assert_eq!(
            report.outcome(PRIMARY_INDEX),
            Some(&IndexOutcome::Skipped(SkipReason::NotElectedMaster))
        );
    }
    assert!(cluster.mutations().is_empty());

    cluster.set_master(true);
    assert_eq!(manager.on_cluster_state_changed().dispatched(), 1);
    settle(&manager).await;
    assert_mappings_and_settings(&cluster, 2);
}

#[tokio::test]
async fn test_unrecovered_cluster_is_not_mutated() {
    let cluster = cluster_with_index(1);
    cluster.set_recovered(false);
    let manager = manager(&cluster, 2);

    let report = manager.on_cluster_state_changed();
    assert_eq!(
        report.outcome(PRIMARY_INDEX),
        Some(&IndexOutcome::Skipped(SkipReason::StateNotRecovered))
    );

    cluster.set_recovered(true);
    assert_eq!(manager.on_cluster_state_changed().dispatched(), 1);
    settle(&manager).await;
}

#[tokio::test]
async fn test_closed_and_red_indices_wait() {
    let cluster = cluster_with_index(1);
    let manager = manager(&cluster, 2);

    cluster.set_index_state(PRIMARY_INDEX, IndexState::Closed);
    assert_eq!(
        manager.on_cluster_state_changed().outcome(PRIMARY_INDEX),
        Some(&IndexOutcome::Skipped(SkipReason::Closed))
    );

    cluster.set_index_state(PRIMARY_INDEX, IndexState::Open);
    cluster.set_health(PRIMARY_INDEX, IndexHealth::Red);
    assert_eq!(
        manager.on_cluster_state_changed().outcome(PRIMARY_INDEX),
        Some(&IndexOutcome::Skipped(SkipReason::Unhealthy))
    );
    assert!(cluster.mutations().is_empty());

    cluster.set_health(PRIMARY_INDEX, IndexHealth::Yellow);
    assert_eq!(manager.on_cluster_state_changed().dispatched(), 1);
    settle(&manager).await;
    assert_mappings_and_settings(&cluster, 2);
}

/// A missing index is never created by the manager
#[tokio::test]
async fn test_missing_index_is_left_missing() {
    let cluster = empty_cluster();
    let manager = manager(&cluster, 2);

    let report = manager.on_cluster_state_changed();
    assert_eq!(
        report.outcome(PRIMARY_INDEX),
        Some(&IndexOutcome::Skipped(SkipReason::Missing))
    );
    assert!(cluster.mutations().is_empty());
    assert!(cluster.mappings(PRIMARY_INDEX).is_none());
}

/// Story: after a reindex the alias points at a new primary
///
/// The alias now resolves to `.test-index-2`; the upgrade lands there and
/// the retired primary is left as it was.
#[tokio::test]
async fn story_rotated_primary_is_upgraded_through_alias() {
    let cluster = cluster_with_index(1);
    cluster.create_index(".test-index-2", mappings(1), Default::default());
    cluster.set_alias(ALIAS, ".test-index-2");
    let manager = manager(&cluster, 2);

    let report = manager.on_cluster_state_changed();
    assert_eq!(report.outcome(".test-index-2"), Some(&IndexOutcome::Dispatched));
    assert_eq!(report.outcome(PRIMARY_INDEX), None);
    settle(&manager).await;

    assert_eq!(cluster.mappings(".test-index-2"), Some(mappings(2)));
    assert_eq!(cluster.mappings(PRIMARY_INDEX), Some(mappings(1)));
    assert_eq!(cluster.mapping_updates(PRIMARY_INDEX), 0);
}

/// Story: an alias pointing at an unmanaged index never redirects writes
///
/// Someone repoints the descriptor's alias at `user-logs`, which no
/// descriptor owns. The manager keeps working on its own primary and the
/// foreign index is left exactly as it was.
#[tokio::test]
async fn story_alias_outside_pattern_is_not_followed() {
    let cluster = cluster_with_index(1);
    cluster.create_index("user-logs", mappings(1), Default::default());
    cluster.set_alias(ALIAS, "user-logs");
    let manager = manager(&cluster, 2);

    let report = manager.on_cluster_state_changed();
    assert_eq!(report.outcome("user-logs"), None);
    assert_eq!(report.outcome(PRIMARY_INDEX), Some(&IndexOutcome::Dispatched));
    settle(&manager).await;

    assert_eq!(cluster.mapping_updates("user-logs"), 0);
    assert_eq!(cluster.mappings("user-logs"), Some(mappings(1)));
    assert_eq!(cluster.settings("user-logs"), Some(Default::default()));
    assert_mappings_and_settings(&cluster, 2);
}

/// Followers report outcomes under the same index names as the master
#[tokio::test]
async fn test_follower_reports_alias_target() {
    let cluster = cluster_with_index(1);
    cluster.create_index(".test-index-2", mappings(1), Default::default());
    cluster.set_alias(ALIAS, ".test-index-2");
    cluster.set_master(false);
    let manager = manager(&cluster, 2);

    let report = manager.on_cluster_state_changed();
    assert_eq!(
        report.outcome(".test-index-2"),
        Some(&IndexOutcome::Skipped(SkipReason::NotElectedMaster))
    );
    assert_eq!(report.outcome(PRIMARY_INDEX), None);
}
