//! Integration scenarios for the system index manager
//!
//! # Test Organization
//!
//! Tests are organized by the story they tell:
//!
//! - `mapping_upgrade`: Stories about stale, current and newer mappings,
//!   including upgrades of the software itself
//!
//! - `concurrency`: Stories about notification bursts while an update is
//!   outstanding, and the notification loop itself
//!
//! - `failure_recovery`: Stories about transient and permanent mutation
//!   failures
//!
//! - `cluster_gating`: Stories about nodes and indices that must not be
//!   mutated (non-master, unrecovered, closed, red, aliased primaries)

mod cluster_gating;
mod helpers;
mod mapping_upgrade;
