//! Manager configuration and descriptor files
//!
//! Descriptors are static for the lifetime of the process. Besides building
//! them in code, they can be loaded from a YAML or JSON file:
//!
//! ```yaml
//! descriptors:
//!   - index_pattern: ".tasks*"
//!     primary_index: ".tasks-1"
//!     alias: ".tasks"
//!     mappings:
//!       _meta:
//!         managed_index_mappings_version: 3
//!       properties:
//!         completed: { type: boolean }
//!     settings:
//!       index.number_of_replicas: 0
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::descriptor::{DescriptorRegistry, SystemIndexDescriptor};
use crate::retry::RetryPolicy;
use crate::{Error, Result, DEFAULT_MUTATION_TIMEOUT};

/// Runtime tuning for [`SystemIndexManager`](crate::controller::SystemIndexManager)
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Upper bound for a single admin API call
    pub mutation_timeout: Duration,
    /// In-call retry budget for transient failures
    pub retry: RetryPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            mutation_timeout: DEFAULT_MUTATION_TIMEOUT,
            retry: RetryPolicy::single_attempt(),
        }
    }
}

/// Top-level layout of a descriptor file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescriptorFile {
    /// Declared descriptors, in registration order
    pub descriptors: Vec<DescriptorSpec>,
}

/// One descriptor as written in a descriptor file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescriptorSpec {
    /// Governed index pattern
    pub index_pattern: String,
    /// Concrete primary index
    pub primary_index: String,
    /// Alias fronting the primary
    #[serde(default)]
    pub alias: Option<String>,
    /// Free-text description
    #[serde(default)]
    pub description: Option<String>,
    /// Declared mapping document
    pub mappings: Value,
    /// Declared settings; scalar values are stringified
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

fn setting_value(descriptor: &str, name: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => Err(Error::configuration(
            descriptor,
            format!("setting {name} must be a string, number or boolean"),
        )),
    }
}

impl TryFrom<DescriptorSpec> for SystemIndexDescriptor {
    type Error = Error;

    fn try_from(spec: DescriptorSpec) -> Result<Self> {
        let mut builder = SystemIndexDescriptor::builder()
            .index_pattern(spec.index_pattern.as_str())
            .primary_index(spec.primary_index)
            .mappings(spec.mappings);
        if let Some(alias) = spec.alias {
            builder = builder.alias(alias);
        }
        if let Some(description) = spec.description {
            builder = builder.description(description);
        }
        for (name, value) in spec.settings {
            let value = setting_value(&spec.index_pattern, &name, value)?;
            builder = builder.setting(name, value);
        }
        builder.build()
    }
}

impl DescriptorFile {
    /// Parse a descriptor file from YAML (JSON is accepted as YAML)
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::serialization(format!("invalid descriptor file: {e}")))
    }

    /// Validate every descriptor and build the registry
    pub fn into_registry(self) -> Result<DescriptorRegistry> {
        let descriptors = self
            .descriptors
            .into_iter()
            .map(SystemIndexDescriptor::try_from)
            .collect::<Result<Vec<_>>>()?;
        DescriptorRegistry::from_descriptors(descriptors)
    }
}

/// Load and validate a descriptor file
pub fn load_registry(path: &Path) -> Result<DescriptorRegistry> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    DescriptorFile::parse(&content)?.into_registry()
}
