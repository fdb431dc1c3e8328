//! Staleness evaluation
//!
//! Pure functions over a descriptor and one cluster state snapshot. Nothing
//! here performs I/O or keeps state between calls: the same inputs always
//! produce the same decision.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::cluster::{ClusterStateReader, IndexHealth, IndexState};
use crate::descriptor::SystemIndexDescriptor;

/// Index state observed in a single snapshot
///
/// Built fresh for every evaluation and never cached across notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedIndexState {
    /// Concrete index name
    pub index: String,
    /// Whether the index exists
    pub exists: bool,
    /// Mapping version marker; 0 when absent or malformed
    pub mapping_version: u64,
    /// Current settings
    pub settings: BTreeMap<String, String>,
}

impl ObservedIndexState {
    /// Read the state of `index` from a snapshot
    pub fn observe<R: ClusterStateReader + ?Sized>(reader: &R, index: &str) -> Self {
        let exists = reader.index_exists(index);
        Self {
            index: index.to_string(),
            exists,
            mapping_version: if exists {
                reader.current_mapping_version(index).unwrap_or(0)
            } else {
                0
            },
            settings: reader.current_settings(index).cloned().unwrap_or_default(),
        }
    }

    /// State of an index that does not exist
    pub fn missing(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            exists: false,
            mapping_version: 0,
            settings: BTreeMap::new(),
        }
    }
}

/// What to do about an index's mappings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReconciliationDecision {
    /// Missing index, or mappings already at the declared version
    NoActionNeeded,
    /// Mappings are older than declared and must be upgraded
    UpgradeRequired {
        /// Version the index will carry after the upgrade
        target_version: u64,
    },
    /// Mappings are newer than this build knows about; leave them alone
    AlreadyNewer,
}

/// Compare declared and observed mapping versions
///
/// Never yields a downgrade: an index ahead of the descriptor is reported as
/// [`ReconciliationDecision::AlreadyNewer`].
pub fn evaluate(
    descriptor: &SystemIndexDescriptor,
    observed: &ObservedIndexState,
) -> ReconciliationDecision {
    if !observed.exists {
        return ReconciliationDecision::NoActionNeeded;
    }

    let declared = descriptor.mappings_version();
    match observed.mapping_version.cmp(&declared) {
        std::cmp::Ordering::Less => ReconciliationDecision::UpgradeRequired {
            target_version: declared,
        },
        std::cmp::Ordering::Equal => ReconciliationDecision::NoActionNeeded,
        std::cmp::Ordering::Greater => ReconciliationDecision::AlreadyNewer,
    }
}

/// Declared settings whose observed value differs
///
/// Settings carry no version marker and are enforced independently of the
/// mapping decision. Only declared keys are ever considered.
pub fn settings_drift(
    descriptor: &SystemIndexDescriptor,
    observed: &ObservedIndexState,
) -> BTreeMap<String, String> {
    if !observed.exists {
        return BTreeMap::new();
    }

    descriptor
        .settings()
        .iter()
        .filter(|(name, value)| observed.settings.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Whether an index can be mutated right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexGate {
    /// Open with primaries allocated
    Ready,
    /// Does not exist; creation is someone else's job
    Missing,
    /// Closed indices cannot take mapping updates
    Closed,
    /// Primaries unallocated; wait for recovery
    Unhealthy,
}

/// Check whether `index` may be mutated in this snapshot
pub fn gate<R: ClusterStateReader + ?Sized>(reader: &R, index: &str) -> IndexGate {
    if !reader.index_exists(index) {
        return IndexGate::Missing;
    }
    if reader.index_state(index) == Some(IndexState::Closed) {
        return IndexGate::Closed;
    }
    if reader.index_health(index) == Some(IndexHealth::Red) {
        return IndexGate::Unhealthy;
    }
    IndexGate::Ready
}

/// Concrete index the descriptor's mappings live in
///
/// A resolvable alias wins over the nominal primary so that a rotated
/// primary is upgraded in place. An alias pointing outside the descriptor's
/// pattern is ignored; that index belongs to someone else.
pub fn target_index<R: ClusterStateReader + ?Sized>(
    descriptor: &SystemIndexDescriptor,
    reader: &R,
) -> String {
    descriptor
        .alias()
        .and_then(|alias| reader.resolve_alias(alias))
        .filter(|target| descriptor.matches(target))
        .unwrap_or_else(|| descriptor.primary_index())
        .to_string()
}

/// Mutation to bring one index in line with its descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdatePlan {
    /// Concrete index to mutate
    pub index: String,
    /// Mapping document to apply, if the mappings are stale
    pub mappings: Option<Value>,
    /// Settings to apply, if any drifted
    pub settings: Option<BTreeMap<String, String>>,
}

impl UpdatePlan {
    /// Whether the plan carries no mutation
    pub fn is_empty(&self) -> bool {
        self.mappings.is_none() && self.settings.is_none()
    }
}

/// Everything one evaluation pass learned about a descriptor's index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    /// Pattern of the descriptor assessed
    pub descriptor: String,
    /// Concrete index evaluated
    pub index: String,
    /// Whether the index may be mutated
    pub gate: IndexGate,
    /// Mapping version declared by the descriptor
    pub declared_version: u64,
    /// State observed in the snapshot
    pub observed: ObservedIndexState,
    /// Mapping decision
    pub decision: ReconciliationDecision,
    /// Declared settings that differ from observed
    pub settings_drift: BTreeMap<String, String>,
}

impl Assessment {
    /// The update this assessment calls for, if any
    ///
    /// Gated indices get no plan even when stale.
    pub fn update_plan(&self, descriptor: &SystemIndexDescriptor) -> Option<UpdatePlan> {
        if self.gate != IndexGate::Ready {
            return None;
        }

        let plan = UpdatePlan {
            index: self.index.clone(),
            mappings: match self.decision {
                ReconciliationDecision::UpgradeRequired { .. } => {
                    Some(descriptor.mappings().clone())
                }
                _ => None,
            },
            settings: (!self.settings_drift.is_empty()).then(|| self.settings_drift.clone()),
        };
        (!plan.is_empty()).then_some(plan)
    }
}

/// Assess a descriptor against one snapshot
pub fn assess<R: ClusterStateReader + ?Sized>(
    descriptor: &SystemIndexDescriptor,
    reader: &R,
) -> Assessment {
    let index = target_index(descriptor, reader);
    let observed = ObservedIndexState::observe(reader, &index);
    Assessment {
        descriptor: descriptor.index_pattern().to_string(),
        gate: gate(reader, &index),
        declared_version: descriptor.mappings_version(),
        decision: evaluate(descriptor, &observed),
        settings_drift: settings_drift(descriptor, &observed),
        observed,
        index,
    }
}
