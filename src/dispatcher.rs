//! Update dispatcher
//!
//! Turns an [`UpdatePlan`] into admin API calls. Every call is bounded by a
//! timeout and its failure classified, so a dispatch always completes and
//! always reports back, even when the connection silently drops.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use opentelemetry::KeyValue;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::FailureKind;
use crate::evaluator::UpdatePlan;
use crate::metrics::UPDATE_DURATION;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::Error;

const PUT_MAPPING: &str = "put_mapping";
const PUT_SETTINGS: &str = "put_settings";

/// Admin API used to mutate index metadata
///
/// Implementations map rejected documents to [`Error::permanent`] and
/// everything else (network, timeout, conflict) to [`Error::transient`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IndexAdminClient: Send + Sync {
    /// Replace the mappings of a concrete index
    async fn put_mapping(&self, index: &str, mappings: &Value) -> Result<(), Error>;

    /// Update the given settings of a concrete index
    async fn put_settings(
        &self,
        index: &str,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), Error>;
}

/// Result of one dispatched mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The admin API acknowledged every mutation in the plan
    Acknowledged,
    /// A mutation failed; later parts of the plan were not attempted
    Failed {
        /// Whether the failure can resolve itself
        kind: FailureKind,
        /// Description of the failure
        message: String,
    },
}

impl DispatchOutcome {
    fn from_error(error: &Error) -> Self {
        Self::Failed {
            kind: error.failure_kind(),
            message: error.to_string(),
        }
    }

    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Acknowledged => "success",
            Self::Failed { kind, .. } => kind.as_str(),
        }
    }
}

/// Applies update plans through an [`IndexAdminClient`]
pub struct UpdateDispatcher {
    client: Arc<dyn IndexAdminClient>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl UpdateDispatcher {
    /// Create a dispatcher with a per-call timeout and retry budget
    pub fn new(client: Arc<dyn IndexAdminClient>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client,
            timeout,
            retry,
        }
    }

    async fn call<F, Fut>(&self, index: &str, operation: &'static str, f: F) -> DispatchOutcome
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<(), Error>>,
    {
        let f = &f;
        let timeout = self.timeout;
        let attempt = move || async move {
            match tokio::time::timeout(timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(Error::transient(
                    index,
                    operation,
                    format!("timed out after {timeout:?}"),
                )),
            }
        };
        let result = retry_with_backoff(&self.retry, operation, Error::is_retryable, attempt).await;

        match result {
            Ok(()) => {
                debug!(index = %index, operation, "Mutation acknowledged");
                DispatchOutcome::Acknowledged
            }
            Err(e) => DispatchOutcome::from_error(&e),
        }
    }

    /// Apply a mapping document to an index
    pub async fn apply_mapping(&self, index: &str, mappings: &Value) -> DispatchOutcome {
        self.call(index, PUT_MAPPING, || self.client.put_mapping(index, mappings))
            .await
    }

    /// Apply settings to an index
    pub async fn apply_settings(
        &self,
        index: &str,
        settings: &BTreeMap<String, String>,
    ) -> DispatchOutcome {
        self.call(index, PUT_SETTINGS, || {
            self.client.put_settings(index, settings)
        })
        .await
    }

    /// Apply a whole plan: mappings first, then settings
    pub async fn apply(&self, plan: &UpdatePlan) -> DispatchOutcome {
        if let Some(mappings) = &plan.mappings {
            let outcome = self.apply_mapping(&plan.index, mappings).await;
            if outcome != DispatchOutcome::Acknowledged {
                return outcome;
            }
        }
        if let Some(settings) = &plan.settings {
            return self.apply_settings(&plan.index, settings).await;
        }
        DispatchOutcome::Acknowledged
    }

    /// Apply a plan in the background and report through `on_complete`
    ///
    /// Returns immediately. `on_complete` runs exactly once on the spawned
    /// task; anything it owns (such as an in-flight guard) is dropped even if
    /// the task panics.
    pub fn dispatch<F>(self: &Arc<Self>, plan: UpdatePlan, on_complete: F) -> JoinHandle<()>
    where
        F: FnOnce(DispatchOutcome) + Send + 'static,
    {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = dispatcher.apply(&plan).await;
            UPDATE_DURATION.record(
                started.elapsed().as_secs_f64(),
                &[KeyValue::new("result", outcome.label())],
            );

            match &outcome {
                DispatchOutcome::Acknowledged => {}
                DispatchOutcome::Failed {
                    kind: FailureKind::Transient,
                    message,
                } => {
                    warn!(
                        index = %plan.index,
                        error = %message,
                        "Index update failed, will retry on next cluster state change"
                    );
                }
                DispatchOutcome::Failed {
                    kind: FailureKind::Permanent,
                    message,
                } => {
                    error!(
                        index = %plan.index,
                        error = %message,
                        "Index update rejected, not retrying"
                    );
                }
            }

            on_complete(outcome);
        })
    }
}
