//! In-process cluster layer
//!
//! Deterministic stand-in for the real cluster: it publishes snapshots,
//! broadcasts change tokens and serves the admin API against its own state.
//! Used by the integration scenarios and the `simulate` command.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{
    ClusterStateChanged, ClusterStateProvider, ClusterStateSnapshot, IndexHealth, IndexMetadata,
    IndexState,
};
use crate::dispatcher::IndexAdminClient;
use crate::error::FailureKind;
use crate::{Error, DEFAULT_NOTIFICATION_BUFFER};

/// One mutation served by the in-memory admin API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum MutationRecord {
    /// A mapping replacement
    PutMapping {
        /// Target index
        index: String,
        /// Applied mapping document
        mappings: Value,
    },
    /// A settings update
    PutSettings {
        /// Target index
        index: String,
        /// Applied settings
        settings: BTreeMap<String, String>,
    },
}

impl MutationRecord {
    /// Index the mutation targeted
    pub fn index(&self) -> &str {
        match self {
            Self::PutMapping { index, .. } | Self::PutSettings { index, .. } => index,
        }
    }

    /// Whether this was a mapping replacement
    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::PutMapping { .. })
    }
}

/// In-memory cluster state with an admin API
pub struct InMemoryCluster {
    state: RwLock<Arc<ClusterStateSnapshot>>,
    subscribers: Mutex<Vec<mpsc::Sender<ClusterStateChanged>>>,
    mutations: Mutex<Vec<MutationRecord>>,
    injected_failures: Mutex<VecDeque<FailureKind>>,
    paused: watch::Sender<bool>,
    notification_buffer: usize,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new(ClusterStateSnapshot::default())
    }
}

impl InMemoryCluster {
    /// Start from an initial state
    pub fn new(initial: ClusterStateSnapshot) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            state: RwLock::new(Arc::new(initial)),
            subscribers: Mutex::new(Vec::new()),
            mutations: Mutex::new(Vec::new()),
            injected_failures: Mutex::new(VecDeque::new()),
            paused,
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
        }
    }

    /// Capacity of channels handed out by later subscriptions
    ///
    /// Tokens published while a subscriber's channel is full are dropped.
    pub fn with_notification_buffer(mut self, capacity: usize) -> Self {
        self.notification_buffer = capacity.max(1);
        self
    }

    /// Apply a change, bump the version and notify subscribers
    fn publish(&self, change: impl FnOnce(&mut ClusterStateSnapshot)) {
        let version = {
            let mut guard = self.state.write();
            let mut next = ClusterStateSnapshot::clone(&guard);
            change(&mut next);
            next.version = guard.version + 1;
            let version = next.version;
            *guard = Arc::new(next);
            version
        };

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(ClusterStateChanged { version }) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        debug!(version, "Published cluster state");
    }

    /// Create an index, as an external client would
    pub fn create_index(
        &self,
        name: impl Into<String>,
        mappings: Value,
        settings: BTreeMap<String, String>,
    ) {
        let name = name.into();
        self.publish(|state| {
            state
                .indices
                .insert(name, IndexMetadata::new(mappings, settings));
        });
    }

    /// Publish a state change unrelated to any managed index
    pub fn touch(&self) {
        self.publish(|_| {});
    }

    /// Point an alias at a concrete index
    pub fn set_alias(&self, alias: impl Into<String>, index: impl Into<String>) {
        let (alias, index) = (alias.into(), index.into());
        self.publish(|state| {
            state.aliases.insert(alias, index);
        });
    }

    /// Change whether the local node is the elected master
    pub fn set_master(&self, is_master: bool) {
        self.publish(|state| state.local_node_is_master = is_master);
    }

    /// Change whether the state counts as recovered
    pub fn set_recovered(&self, recovered: bool) {
        self.publish(|state| state.recovered = recovered);
    }

    /// Change the health of an index
    pub fn set_health(&self, index: &str, health: IndexHealth) {
        self.publish(|state| {
            if let Some(meta) = state.indices.get_mut(index) {
                meta.health = health;
            }
        });
    }

    /// Open or close an index
    pub fn set_index_state(&self, index: &str, index_state: IndexState) {
        self.publish(|state| {
            if let Some(meta) = state.indices.get_mut(index) {
                meta.state = index_state;
            }
        });
    }

    /// Fail the next mutation with the given kind
    pub fn fail_next_mutation(&self, kind: FailureKind) {
        self.injected_failures.lock().push_back(kind);
    }

    /// Hold every mutation until [`resume_mutations`](Self::resume_mutations)
    pub fn pause_mutations(&self) {
        self.paused.send_replace(true);
    }

    /// Release held mutations
    pub fn resume_mutations(&self) {
        self.paused.send_replace(false);
    }

    /// Every mutation served so far, in order
    pub fn mutations(&self) -> Vec<MutationRecord> {
        self.mutations.lock().clone()
    }

    /// Number of mapping replacements served for an index
    pub fn mapping_updates(&self, index: &str) -> usize {
        self.mutations
            .lock()
            .iter()
            .filter(|m| m.is_mapping() && m.index() == index)
            .count()
    }

    /// Current mappings of an index
    pub fn mappings(&self, index: &str) -> Option<Value> {
        self.state
            .read()
            .index(index)
            .and_then(|meta| meta.mappings.clone())
    }

    /// Current settings of an index
    pub fn settings(&self, index: &str) -> Option<BTreeMap<String, String>> {
        self.state.read().index(index).map(|meta| meta.settings.clone())
    }

    async fn admit(&self, index: &str, operation: &str) -> Result<(), Error> {
        let mut paused = self.paused.subscribe();
        if paused.wait_for(|held| !*held).await.is_err() {
            return Err(Error::transient(index, operation, "cluster shut down"));
        }

        match self.injected_failures.lock().pop_front() {
            Some(FailureKind::Transient) => {
                Err(Error::transient(index, operation, "node unavailable"))
            }
            Some(FailureKind::Permanent) => {
                Err(Error::permanent(index, operation, "document rejected"))
            }
            None if !self.state.read().indices.contains_key(index) => {
                Err(Error::permanent(index, operation, "index not found"))
            }
            None => Ok(()),
        }
    }
}

impl ClusterStateProvider for InMemoryCluster {
    fn snapshot(&self) -> Arc<ClusterStateSnapshot> {
        Arc::clone(&self.state.read())
    }

    fn subscribe(&self) -> mpsc::Receiver<ClusterStateChanged> {
        let (tx, rx) = mpsc::channel(self.notification_buffer);
        self.subscribers.lock().push(tx);
        rx
    }
}

#[async_trait]
impl IndexAdminClient for InMemoryCluster {
    async fn put_mapping(&self, index: &str, mappings: &Value) -> Result<(), Error> {
        self.admit(index, "put_mapping").await?;
        self.mutations.lock().push(MutationRecord::PutMapping {
            index: index.to_string(),
            mappings: mappings.clone(),
        });
        self.publish(|state| {
            if let Some(meta) = state.indices.get_mut(index) {
                meta.mappings = Some(mappings.clone());
            }
        });
        Ok(())
    }

    async fn put_settings(
        &self,
        index: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        self.admit(index, "put_settings").await?;
        self.mutations.lock().push(MutationRecord::PutSettings {
            index: index.to_string(),
            settings: settings.clone(),
        });
        self.publish(|state| {
            if let Some(meta) = state.indices.get_mut(index) {
                meta.settings
                    .extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        });
        Ok(())
    }
}
