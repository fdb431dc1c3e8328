//! Registry of managed-index descriptors
//!
//! Populated once at startup, then shared as `Arc<DescriptorRegistry>`.
//! Registration needs `&mut self`, so a shared registry cannot change.

use std::sync::Arc;

use tracing::debug;

use super::SystemIndexDescriptor;
use crate::{Error, Result};

/// Ordered set of descriptors with non-overlapping index patterns
#[derive(Debug, Default, Clone)]
pub struct DescriptorRegistry {
    descriptors: Vec<Arc<SystemIndexDescriptor>>,
}

impl DescriptorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from descriptors, rejecting any overlap
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = SystemIndexDescriptor>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Register a descriptor
    ///
    /// Fails if its pattern overlaps a registered one: two descriptors
    /// claiming the same index would race each other's upgrades.
    pub fn register(&mut self, descriptor: SystemIndexDescriptor) -> Result<()> {
        if let Some(existing) = self
            .descriptors
            .iter()
            .find(|d| d.index_pattern().overlaps(descriptor.index_pattern()))
        {
            return Err(Error::configuration(
                descriptor.index_pattern().as_str(),
                format!(
                    "index pattern overlaps with registered descriptor {}",
                    existing.index_pattern()
                ),
            ));
        }

        debug!(
            pattern = %descriptor.index_pattern(),
            primary = %descriptor.primary_index(),
            version = descriptor.mappings_version(),
            "Registered system index descriptor"
        );
        self.descriptors.push(Arc::new(descriptor));
        Ok(())
    }

    /// All descriptors in registration order
    pub fn all(&self) -> &[Arc<SystemIndexDescriptor>] {
        &self.descriptors
    }

    /// The descriptor governing `index`, if any
    pub fn find(&self, index: &str) -> Option<&Arc<SystemIndexDescriptor>> {
        self.descriptors.iter().find(|d| d.matches(index))
    }

    /// Whether `index` is managed by this registry
    pub fn is_system_index(&self, index: &str) -> bool {
        self.find(index).is_some()
    }

    /// Number of registered descriptors
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether no descriptor is registered
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
