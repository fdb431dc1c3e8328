//! System Index Manager - keeps managed index schemas in line with their descriptors
//!
//! A small set of internally-managed ("system") indices have their mappings
//! and settings owned by the software itself. Each is declared by a
//! version-tagged descriptor; on every cluster state change the manager
//! compares declared and observed schema versions and upgrades stale indices.
//!
//! # Architecture
//!
//! - The cluster layer publishes snapshots and change notifications
//! - The manager evaluates every descriptor against one snapshot per pass
//! - Stale indices get at most one outstanding update at a time
//! - Indices ahead of the declared version are never downgraded
//!
//! # Modules
//!
//! - [`descriptor`] - Descriptors and the descriptor registry
//! - [`cluster`] - Cluster state snapshots, the provider seam, in-memory cluster
//! - [`evaluator`] - Pure staleness evaluation and update planning
//! - [`dispatcher`] - Admin API seam and update dispatch
//! - [`controller`] - The reconciliation loop
//! - [`config`] - Manager configuration and descriptor files
//! - [`retry`] - Bounded retry with backoff
//! - [`metrics`] - OpenTelemetry instruments
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cluster;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod retry;

use std::time::Duration;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Key under a mapping's `_meta` object carrying the managed mapping version
pub const MAPPING_VERSION_META_KEY: &str = "managed_index_mappings_version";

/// Default upper bound for a single admin API call
///
/// Calls exceeding it fail as transient, releasing their index.
pub const DEFAULT_MUTATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default capacity of a cluster state notification channel
pub const DEFAULT_NOTIFICATION_BUFFER: usize = 64;
