//! Cluster state as seen by the manager
//!
//! The cluster layer owns membership, consensus and state publication. The
//! manager only consumes it through two narrow seams:
//!
//! - [`ClusterStateReader`]: synchronous reads against one materialized
//!   snapshot. Every read in a reconciliation pass goes to the same snapshot,
//!   so an existence check and a version read can never disagree.
//! - [`ClusterStateProvider`]: hands out the current snapshot and a stream of
//!   change notifications.

mod memory;

pub use memory::{InMemoryCluster, MutationRecord};

use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::descriptor::mapping_version;

/// Token pushed by the cluster layer whenever state may have changed
///
/// Carries no payload beyond the version that triggered it; consumers
/// re-derive everything from a fresh snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterStateChanged {
    /// Cluster state version that was published
    pub version: u64,
}

/// Whether an index accepts reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    /// Open for reads and writes
    #[default]
    Open,
    /// Closed; mappings cannot be updated
    Closed,
}

/// Shard allocation health of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexHealth {
    /// All shards allocated
    #[default]
    Green,
    /// Primaries allocated, some replicas missing
    Yellow,
    /// At least one primary unallocated
    Red,
}

/// Metadata of one index inside a snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexMetadata {
    /// Open or closed
    pub state: IndexState,
    /// Allocation health
    pub health: IndexHealth,
    /// Current mapping document, if one has been set
    pub mappings: Option<Value>,
    /// Current index settings
    pub settings: BTreeMap<String, String>,
}

impl IndexMetadata {
    /// Open, green index with the given mappings and settings
    pub fn new(mappings: Value, settings: BTreeMap<String, String>) -> Self {
        Self {
            mappings: Some(mappings),
            settings,
            ..Default::default()
        }
    }
}

/// Synchronous, in-memory reads against one cluster state snapshot
pub trait ClusterStateReader {
    /// Version of the snapshot
    fn version(&self) -> u64;

    /// Whether the local node is the elected master
    fn is_elected_master(&self) -> bool;

    /// Whether the cluster state has been recovered after a full restart
    fn is_recovered(&self) -> bool;

    /// Whether a concrete index exists
    fn index_exists(&self, index: &str) -> bool;

    /// Mapping version marker of the index, if set and well-formed
    fn current_mapping_version(&self, index: &str) -> Option<u64>;

    /// Current settings of the index
    fn current_settings(&self, index: &str) -> Option<&BTreeMap<String, String>>;

    /// Open/closed state of the index
    fn index_state(&self, index: &str) -> Option<IndexState>;

    /// Allocation health of the index
    fn index_health(&self, index: &str) -> Option<IndexHealth>;

    /// Concrete index an alias points at
    fn resolve_alias(&self, alias: &str) -> Option<&str>;
}

/// Immutable, materialized cluster state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterStateSnapshot {
    /// Monotonic state version
    pub version: u64,
    /// Whether the local node is the elected master
    pub local_node_is_master: bool,
    /// Whether the state has been recovered from disk
    pub recovered: bool,
    /// Concrete indices by name
    pub indices: BTreeMap<String, IndexMetadata>,
    /// Alias name to concrete index
    pub aliases: BTreeMap<String, String>,
}

impl Default for ClusterStateSnapshot {
    fn default() -> Self {
        Self {
            version: 0,
            local_node_is_master: true,
            recovered: true,
            indices: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }
}

impl ClusterStateSnapshot {
    /// Add or replace an index
    pub fn with_index(mut self, name: impl Into<String>, metadata: IndexMetadata) -> Self {
        self.indices.insert(name.into(), metadata);
        self
    }

    /// Point an alias at a concrete index
    pub fn with_alias(mut self, alias: impl Into<String>, index: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), index.into());
        self
    }

    /// Metadata of a concrete index
    pub fn index(&self, name: &str) -> Option<&IndexMetadata> {
        self.indices.get(name)
    }
}

impl ClusterStateReader for ClusterStateSnapshot {
    fn version(&self) -> u64 {
        self.version
    }

    fn is_elected_master(&self) -> bool {
        self.local_node_is_master
    }

    fn is_recovered(&self) -> bool {
        self.recovered
    }

    fn index_exists(&self, index: &str) -> bool {
        self.indices.contains_key(index)
    }

    fn current_mapping_version(&self, index: &str) -> Option<u64> {
        self.index(index)
            .and_then(|meta| meta.mappings.as_ref())
            .and_then(mapping_version)
    }

    fn current_settings(&self, index: &str) -> Option<&BTreeMap<String, String>> {
        self.index(index).map(|meta| &meta.settings)
    }

    fn index_state(&self, index: &str) -> Option<IndexState> {
        self.index(index).map(|meta| meta.state)
    }

    fn index_health(&self, index: &str) -> Option<IndexHealth> {
        self.index(index).map(|meta| meta.health)
    }

    fn resolve_alias(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }
}

/// Source of cluster state snapshots and change notifications
#[cfg_attr(test, automock)]
pub trait ClusterStateProvider: Send + Sync {
    /// The most recently published state
    fn snapshot(&self) -> Arc<ClusterStateSnapshot>;

    /// Subscribe to state change notifications
    ///
    /// Producers must never block on a full channel: a pending token already
    /// guarantees a future pass, so extra tokens can be dropped.
    fn subscribe(&self) -> mpsc::Receiver<ClusterStateChanged>;
}
