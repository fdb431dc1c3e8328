//! SystemIndexManager reconciliation loop
//!
//! On every cluster state change the manager takes one snapshot, assesses
//! every registered descriptor against it and dispatches an update for each
//! index that is stale and not already in flight.
//!
//! Per index the loop is a two-state machine:
//!
//! ```text
//!   Idle ──(stale, marker acquired)──▶ Dispatching
//!    ▲                                    │
//!    └──────(completion, any outcome)─────┘
//! ```
//!
//! A failed update is retried naturally: the stale condition persists and
//! the next notification re-triggers it. Permanent failures are the
//! exception and are parked until the observed state changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::in_flight::InFlightSet;
use crate::cluster::{ClusterStateChanged, ClusterStateProvider, ClusterStateReader};
use crate::config::ManagerConfig;
use crate::descriptor::{DescriptorRegistry, SystemIndexDescriptor};
use crate::dispatcher::{DispatchOutcome, IndexAdminClient, UpdateDispatcher};
use crate::error::FailureKind;
use crate::evaluator::{assess, target_index, Assessment, IndexGate, ReconciliationDecision};
use crate::metrics::{RECONCILE_PASSES, STUCK_INDICES, UPDATES_DISPATCHED, UPDATE_FAILURES};

/// Why an index was not evaluated for mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Only the elected master mutates system indices
    NotElectedMaster,
    /// Cluster state not yet recovered after a full restart
    StateNotRecovered,
    /// Index does not exist
    Missing,
    /// Index is closed
    Closed,
    /// Index primaries are not allocated
    Unhealthy,
}

/// What one pass did for one index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    /// Not evaluated for mutation
    Skipped(SkipReason),
    /// Mappings and settings already match
    UpToDate,
    /// Mappings are newer than declared and settings match
    AlreadyNewer,
    /// An update was dispatched
    Dispatched,
    /// Stale, but an update is already outstanding
    InFlight,
    /// Stale, but the same update already failed permanently
    Stuck,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Version of the snapshot the pass evaluated
    pub cluster_state_version: u64,
    /// Outcome per target index, in descriptor order
    pub outcomes: Vec<(String, IndexOutcome)>,
}

impl PassReport {
    /// Outcome for a concrete index
    pub fn outcome(&self, index: &str) -> Option<&IndexOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == index)
            .map(|(_, outcome)| outcome)
    }

    /// Number of updates dispatched by this pass
    pub fn dispatched(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == IndexOutcome::Dispatched)
            .count()
    }
}

/// Record of an update the admin API rejected
///
/// Matches an assessment only while the observed state and the plan are
/// exactly what failed; any change makes the update eligible again.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StuckUpdate {
    observed_version: u64,
    target: ReconciliationDecision,
    settings: BTreeMap<String, String>,
    message: String,
}

impl StuckUpdate {
    fn from_assessment(assessment: &Assessment, message: String) -> Self {
        Self {
            observed_version: assessment.observed.mapping_version,
            target: assessment.decision,
            settings: assessment.settings_drift.clone(),
            message,
        }
    }

    fn matches(&self, assessment: &Assessment) -> bool {
        self.observed_version == assessment.observed.mapping_version
            && self.target == assessment.decision
            && self.settings == assessment.settings_drift
    }
}

/// Reconciles managed indices with their descriptors
///
/// Owns the in-flight set and the permanent-failure records.
pub struct SystemIndexManager {
    registry: Arc<DescriptorRegistry>,
    cluster: Arc<dyn ClusterStateProvider>,
    dispatcher: Arc<UpdateDispatcher>,
    in_flight: InFlightSet,
    stuck: Arc<DashMap<String, StuckUpdate>>,
    config: ManagerConfig,
}

impl SystemIndexManager {
    /// Create a manager over a registry, a cluster layer and an admin API
    pub fn new(
        registry: Arc<DescriptorRegistry>,
        cluster: Arc<dyn ClusterStateProvider>,
        admin: Arc<dyn IndexAdminClient>,
        config: ManagerConfig,
    ) -> Self {
        let dispatcher = Arc::new(UpdateDispatcher::new(
            admin,
            config.mutation_timeout,
            config.retry.clone(),
        ));
        Self {
            registry,
            cluster,
            dispatcher,
            in_flight: InFlightSet::new(),
            stuck: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Indices with an outstanding update
    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Whether `index` is parked after a permanent failure
    pub fn is_stuck(&self, index: &str) -> bool {
        self.stuck.contains_key(index)
    }

    /// Wait until no update is in flight
    pub async fn wait_idle(&self) {
        self.in_flight.wait_idle().await;
    }

    /// Run one reconciliation pass over a fresh snapshot
    ///
    /// Never waits on the admin API: updates run on spawned tasks, so this
    /// must be called from within a tokio runtime.
    #[instrument(skip(self), fields(descriptors = self.registry.len()))]
    pub fn on_cluster_state_changed(&self) -> PassReport {
        let snapshot = self.cluster.snapshot();
        let version = snapshot.version();

        let global_skip = if !snapshot.is_elected_master() {
            Some(SkipReason::NotElectedMaster)
        } else if !snapshot.is_recovered() {
            Some(SkipReason::StateNotRecovered)
        } else {
            None
        };

        if let Some(reason) = global_skip {
            debug!(version, ?reason, "Skipping system index reconciliation");
            RECONCILE_PASSES.add(1, &[KeyValue::new("result", "skipped")]);
            return PassReport {
                cluster_state_version: version,
                outcomes: self
                    .registry
                    .all()
                    .iter()
                    .map(|d| {
                        let index = target_index(d.as_ref(), snapshot.as_ref());
                        (index, IndexOutcome::Skipped(reason))
                    })
                    .collect(),
            };
        }

        let outcomes = self
            .registry
            .all()
            .iter()
            .map(|descriptor| {
                let assessment = assess(descriptor.as_ref(), snapshot.as_ref());
                let outcome = self.reconcile(descriptor, &assessment);
                (assessment.index, outcome)
            })
            .collect();

        RECONCILE_PASSES.add(1, &[KeyValue::new("result", "evaluated")]);
        STUCK_INDICES.record(self.stuck.len() as u64, &[]);

        PassReport {
            cluster_state_version: version,
            outcomes,
        }
    }

    fn reconcile(
        &self,
        descriptor: &SystemIndexDescriptor,
        assessment: &Assessment,
    ) -> IndexOutcome {
        let index = assessment.index.as_str();

        match assessment.gate {
            IndexGate::Ready => {}
            IndexGate::Missing => return IndexOutcome::Skipped(SkipReason::Missing),
            IndexGate::Closed => {
                debug!(index = %index, "Managed index is closed, skipping");
                return IndexOutcome::Skipped(SkipReason::Closed);
            }
            IndexGate::Unhealthy => {
                debug!(index = %index, "Managed index primaries unavailable, skipping");
                return IndexOutcome::Skipped(SkipReason::Unhealthy);
            }
        }

        if assessment.decision == ReconciliationDecision::AlreadyNewer {
            debug!(
                index = %index,
                observed = assessment.observed.mapping_version,
                declared = assessment.declared_version,
                "Managed index mappings are newer than declared, leaving them alone"
            );
        }

        let Some(plan) = assessment.update_plan(descriptor) else {
            // Converged, so any earlier permanent failure no longer applies
            if self.stuck.remove(index).is_some() {
                info!(index = %index, "Previously stuck system index has converged");
            }
            return match assessment.decision {
                ReconciliationDecision::AlreadyNewer => IndexOutcome::AlreadyNewer,
                _ => IndexOutcome::UpToDate,
            };
        };

        // Only a record for a different plan is stale
        self.stuck.remove_if(index, |_, stuck| !stuck.matches(assessment));
        if self.is_parked(index, assessment) {
            return IndexOutcome::Stuck;
        }

        // Check-and-mark in one atomic insert
        let Some(guard) = self.in_flight.try_acquire(index) else {
            debug!(index = %index, "Update already in flight, not dispatching again");
            return IndexOutcome::InFlight;
        };

        // A failure that completed since the check above was recorded before
        // its guard dropped, so holding the guard makes it visible here
        if self.is_parked(index, assessment) {
            drop(guard);
            return IndexOutcome::Stuck;
        }

        info!(
            index = %index,
            descriptor = %descriptor.description(),
            from_version = assessment.observed.mapping_version,
            to_version = assessment.declared_version,
            upgrade_mappings = plan.mappings.is_some(),
            settings = plan.settings.as_ref().map_or(0, BTreeMap::len),
            "Dispatching system index update"
        );
        UPDATES_DISPATCHED.add(
            1,
            &[
                KeyValue::new("index", index.to_string()),
                KeyValue::new("mappings", plan.mappings.is_some()),
            ],
        );

        let stuck = Arc::clone(&self.stuck);
        let failed = StuckUpdate::from_assessment(assessment, String::new());
        self.dispatcher.dispatch(plan, move |outcome| {
            let index = guard.index().to_string();
            match outcome {
                DispatchOutcome::Acknowledged => {
                    debug!(index = %index, "System index update applied");
                }
                DispatchOutcome::Failed { kind, message } => {
                    UPDATE_FAILURES.add(
                        1,
                        &[
                            KeyValue::new("index", index.clone()),
                            KeyValue::new("kind", kind.as_str()),
                        ],
                    );
                    if kind == FailureKind::Permanent {
                        warn!(index = %index, "Parking system index until its state changes");
                        // Recorded before the guard drops so no pass can slip in a retry
                        stuck.insert(index, StuckUpdate { message, ..failed });
                    }
                }
            }
            drop(guard);
        });

        IndexOutcome::Dispatched
    }

    fn is_parked(&self, index: &str, assessment: &Assessment) -> bool {
        match self.stuck.get(index) {
            Some(stuck) if stuck.matches(assessment) => {
                debug!(
                    index = %index,
                    error = %stuck.message,
                    "Update previously rejected, not retrying"
                );
                true
            }
            _ => false,
        }
    }

    /// Consume notifications until the channel closes or `shutdown` fires
    ///
    /// Tokens that pile up while a pass runs are coalesced into one pass.
    pub async fn run(
        self: Arc<Self>,
        mut notifications: mpsc::Receiver<ClusterStateChanged>,
        shutdown: CancellationToken,
    ) {
        info!(
            descriptors = self.registry.len(),
            "System index manager started"
        );

        loop {
            let token = tokio::select! {
                _ = shutdown.cancelled() => break,
                token = notifications.recv() => token,
            };
            let Some(mut latest) = token else { break };

            let mut coalesced = 0usize;
            while let Ok(next) = notifications.try_recv() {
                latest = next;
                coalesced += 1;
            }
            if coalesced > 0 {
                debug!(
                    version = latest.version,
                    coalesced,
                    "Coalesced cluster state notifications"
                );
            }

            self.on_cluster_state_changed();
        }

        info!(in_flight = self.in_flight.len(), "System index manager stopped");
    }
}
