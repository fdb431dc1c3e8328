//! System index descriptors
//!
//! A descriptor is the declared, version-tagged definition of one managed
//! index: which names it governs, which concrete index holds the writable
//! mapping, and the mappings and settings this build of the software expects.

mod registry;

pub use registry::DescriptorRegistry;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result, MAPPING_VERSION_META_KEY};

/// Extract the managed mapping version from a mapping document
///
/// Reads `_meta.managed_index_mappings_version`. Returns `None` when the
/// marker is missing or is not a non-negative integer.
pub fn mapping_version(mappings: &Value) -> Option<u64> {
    mappings
        .get("_meta")
        .and_then(|meta| meta.get(MAPPING_VERSION_META_KEY))
        .and_then(Value::as_u64)
}

/// Name pattern governed by a descriptor
///
/// Either a literal index name or a prefix followed by a single trailing `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IndexPattern(String);

impl IndexPattern {
    /// Parse and validate a pattern
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.is_empty() || pattern == "*" {
            return Err(Error::configuration(
                pattern,
                "index pattern must name at least one character before any wildcard",
            ));
        }
        if let Some(pos) = pattern.find('*') {
            if pos != pattern.len() - 1 {
                return Err(Error::configuration(
                    pattern.as_str(),
                    "index pattern may only use '*' as its final character",
                ));
            }
        }
        Ok(Self(pattern))
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn prefix(&self) -> Option<&str> {
        self.0.strip_suffix('*')
    }

    /// Whether `index` is governed by this pattern
    pub fn matches(&self, index: &str) -> bool {
        match self.prefix() {
            Some(prefix) => index.starts_with(prefix),
            None => self.0 == index,
        }
    }

    /// Whether some index name would be matched by both patterns
    pub fn overlaps(&self, other: &IndexPattern) -> bool {
        match (self.prefix(), other.prefix()) {
            (Some(a), Some(b)) => a.starts_with(b) || b.starts_with(a),
            (Some(_), None) => self.matches(&other.0),
            (None, Some(_)) => other.matches(&self.0),
            (None, None) => self.0 == other.0,
        }
    }
}

impl TryFrom<String> for IndexPattern {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<IndexPattern> for String {
    fn from(pattern: IndexPattern) -> Self {
        pattern.0
    }
}

impl std::fmt::Display for IndexPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared definition of one managed index
///
/// Immutable after construction; the registry hands it out as `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemIndexDescriptor {
    index_pattern: IndexPattern,
    primary_index: String,
    alias: Option<String>,
    description: String,
    mappings: Value,
    mappings_version: u64,
    settings: BTreeMap<String, String>,
}

impl SystemIndexDescriptor {
    /// Start building a descriptor
    pub fn builder() -> SystemIndexDescriptorBuilder {
        SystemIndexDescriptorBuilder::default()
    }

    /// Pattern of index names this descriptor governs
    pub fn index_pattern(&self) -> &IndexPattern {
        &self.index_pattern
    }

    /// Concrete index holding the writable mapping
    pub fn primary_index(&self) -> &str {
        &self.primary_index
    }

    /// Alias fronting a rotated primary, if any
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Free-text description used in logs
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Declared mapping document
    pub fn mappings(&self) -> &Value {
        &self.mappings
    }

    /// Version marker carried by the declared mappings
    pub fn mappings_version(&self) -> u64 {
        self.mappings_version
    }

    /// Declared settings; only these are enforced
    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    /// Whether `index` is governed by this descriptor
    pub fn matches(&self, index: &str) -> bool {
        self.index_pattern.matches(index)
    }
}

/// Builder for [`SystemIndexDescriptor`]
///
/// All validation happens in [`build`](Self::build); a malformed descriptor
/// is a configuration error and must stop the manager from starting.
#[derive(Debug, Default, Clone)]
pub struct SystemIndexDescriptorBuilder {
    index_pattern: Option<String>,
    primary_index: Option<String>,
    alias: Option<String>,
    description: Option<String>,
    mappings: Option<Value>,
    settings: BTreeMap<String, String>,
}

impl SystemIndexDescriptorBuilder {
    /// Set the governed index pattern
    pub fn index_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.index_pattern = Some(pattern.into());
        self
    }

    /// Set the concrete primary index
    pub fn primary_index(mut self, name: impl Into<String>) -> Self {
        self.primary_index = Some(name.into());
        self
    }

    /// Set the alias fronting the primary
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the declared mapping document
    pub fn mappings(mut self, mappings: Value) -> Self {
        self.mappings = Some(mappings);
        self
    }

    /// Declare one required setting
    pub fn setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(name.into(), value.into());
        self
    }

    /// Declare several required settings
    pub fn settings<K, V>(mut self, settings: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.settings
            .extend(settings.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Validate and build the descriptor
    pub fn build(self) -> Result<SystemIndexDescriptor> {
        let raw_pattern = self
            .index_pattern
            .ok_or_else(|| {
                Error::configuration(crate::error::UNKNOWN_CONTEXT, "missing index pattern")
            })?;
        let index_pattern = IndexPattern::new(raw_pattern)?;
        let name = index_pattern.as_str().to_string();

        let primary_index = self
            .primary_index
            .ok_or_else(|| Error::configuration(&name, "missing primary index"))?;
        if !index_pattern.matches(&primary_index) {
            return Err(Error::configuration(
                &name,
                format!("primary index {primary_index} does not match the index pattern"),
            ));
        }

        if let Some(alias) = &self.alias {
            if alias.is_empty() || *alias == primary_index {
                return Err(Error::configuration(
                    &name,
                    "alias must be non-empty and differ from the primary index",
                ));
            }
        }

        let mappings = self
            .mappings
            .ok_or_else(|| Error::configuration(&name, "missing mappings"))?;
        if !mappings.is_object() {
            return Err(Error::configuration(&name, "mappings must be a JSON object"));
        }
        let mappings_version = mapping_version(&mappings).ok_or_else(|| {
            Error::configuration(
                &name,
                format!(
                    "mappings must declare _meta.{MAPPING_VERSION_META_KEY} \
                     as a non-negative integer"
                ),
            )
        })?;

        if self.settings.keys().any(String::is_empty) {
            return Err(Error::configuration(&name, "setting names must be non-empty"));
        }

        Ok(SystemIndexDescriptor {
            description: self.description.unwrap_or_else(|| name.clone()),
            index_pattern,
            primary_index,
            alias: self.alias,
            mappings,
            mappings_version,
            settings: self.settings,
        })
    }
}
