//! Reconciliation controller for managed system indices
//!
//! The controller follows the observe-diff-act loop: observe one cluster
//! state snapshot, diff every descriptor against it, act by dispatching at
//! most one outstanding update per index.

mod in_flight;
mod manager;

pub use in_flight::{InFlightGuard, InFlightSet};
pub use manager::{IndexOutcome, PassReport, SkipReason, SystemIndexManager};
