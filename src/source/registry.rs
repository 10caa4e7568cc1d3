//! Source registry
//!
//! Maps a source identifier to its adapter. Built once at startup so call
//! sites never dispatch on strings.

use super::adapter::SourceAdapter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default)]
pub struct SourceRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
    /// Enabled sources in fan-out order
    order: Vec<String>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry enabling `order` out of the `available` adapters
    ///
    /// An empty `order` enables every available adapter in the given order.
    /// Names without an adapter are skipped with a warning.
    pub fn from_order(order: &[String], available: Vec<Arc<dyn SourceAdapter>>) -> Self {
        let mut registry = Self::new();
        if order.is_empty() {
            for adapter in available {
                registry.register(adapter);
            }
            info!(sources = ?registry.order, "Source registry ready");
            return registry;
        }

        let mut by_name: HashMap<String, Arc<dyn SourceAdapter>> = available
            .into_iter()
            .map(|adapter| (adapter.name().to_string(), adapter))
            .collect();

        for name in order {
            match by_name.remove(name) {
                Some(adapter) => registry.register(adapter),
                None if registry.get(name).is_some() => {
                    warn!(source = %name, "Source listed twice in source order, ignoring repeat")
                }
                None => warn!(source = %name, "No adapter available for configured source, skipping"),
            }
        }

        info!(sources = ?registry.order, "Source registry ready");
        registry
    }

    /// Enable an adapter at the end of the fan-out order. Re-registering a
    /// name replaces the adapter and keeps its position.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        let name = adapter.name().to_string();
        if self.adapters.insert(name.clone(), adapter).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Enabled adapters in fan-out order
    pub fn enabled(&self) -> Vec<Arc<dyn SourceAdapter>> {
        self.order
            .iter()
            .filter_map(|name| self.adapters.get(name).cloned())
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
