//! Provider registry: ordered adapter entries with priority-based routing.
//!
//! Adding a backend means one new entry in [`ProviderRegistry::with_defaults`].

use std::sync::Arc;

use tracing::info;

use crate::config::ProvidersConfig;
use crate::providers::espn::EspnProvider;
use crate::providers::sportsdb::SportsDbProvider;
use crate::providers::{ProviderStats, SportsProvider};

pub struct RegistryEntry {
    pub name: String,
    pub adapter: Arc<dyn SportsProvider>,
    /// Lower is preferred
    pub priority: u32,
    pub enabled: bool,
}

pub struct ProviderRegistry {
    entries: Vec<RegistryEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// The production adapter set. The single registration site.
    pub fn with_defaults(config: &ProvidersConfig) -> Self {
        let mut registry = Self::new();

        registry.register(
            "espn",
            Arc::new(EspnProvider::new(config.espn.requests_per_minute)),
            config.espn.priority,
            config.espn.enabled,
        );
        registry.register(
            "sportsdb",
            Arc::new(SportsDbProvider::new(
                config.sportsdb.requests_per_minute,
                config.sportsdb.api_key.clone(),
            )),
            config.sportsdb.priority,
            config.sportsdb.enabled,
        );

        info!(
            "Provider registry initialized with {} adapters",
            registry.entries.len()
        );
        registry
    }

    pub fn register(
        &mut self,
        name: &str,
        adapter: Arc<dyn SportsProvider>,
        priority: u32,
        enabled: bool,
    ) {
        self.entries.push(RegistryEntry {
            name: name.to_string(),
            adapter,
            priority,
            enabled,
        });
        self.entries.sort_by_key(|e| e.priority);
    }

    /// The enabled adapter with the lowest priority that supports `league`.
    pub fn adapter_for(&self, league: &str) -> Option<&RegistryEntry> {
        self.entries
            .iter()
            .find(|e| e.enabled && e.adapter.supports_league(league))
    }

    /// A specific adapter by name, for league→provider routing overrides.
    pub fn adapter_named(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.enabled && e.name == name)
    }

    pub fn enabled_entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }

    pub fn provider_stats(&self) -> Vec<ProviderStats> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.adapter.stats())
            .collect()
    }

    pub fn reset_provider_stats(&self) {
        for entry in self.entries.iter().filter(|e| e.enabled) {
            entry.adapter.reset_stats();
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
