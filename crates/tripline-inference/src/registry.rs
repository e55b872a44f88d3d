//! Loaded vendor settings and provider construction.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, warn};

use tripline_core::{Error, ProviderKind, Result, Tier};

use crate::config::{config_dir_from_env, ProviderSettings};
use crate::provider::Provider;

/// Settings for every vendor, loaded once per process.
///
/// A vendor whose config file is unreadable is remembered with its error so
/// that only that vendor fails to construct.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    settings: BTreeMap<ProviderKind, ProviderSettings>,
    load_errors: BTreeMap<ProviderKind, String>,
}

impl ProviderRegistry {
    /// Load every vendor from `config_dir` and the environment.
    pub fn load(config_dir: &Path) -> Self {
        let mut registry = Self::default();
        for kind in ProviderKind::ALL {
            match ProviderSettings::load(kind, config_dir) {
                Ok(settings) => {
                    debug!(
                        subsystem = "inference",
                        component = "registry",
                        provider = %kind,
                        has_key = settings.api_key.is_some(),
                        "Loaded provider settings"
                    );
                    registry.settings.insert(kind, settings);
                }
                Err(e) => {
                    warn!(
                        subsystem = "inference",
                        component = "registry",
                        provider = %kind,
                        error = %e,
                        "Provider settings unavailable"
                    );
                    registry.load_errors.insert(kind, e.to_string());
                }
            }
        }
        registry
    }

    /// Load from `TRIPLINE_CONFIG_DIR` (default `config/`).
    pub fn from_env() -> Self {
        Self::load(&config_dir_from_env())
    }

    /// Replace the settings for one vendor.
    pub fn with_settings(mut self, kind: ProviderKind, settings: ProviderSettings) -> Self {
        self.load_errors.remove(&kind);
        self.settings.insert(kind, settings);
        self
    }

    pub fn settings(&self, kind: ProviderKind) -> Option<&ProviderSettings> {
        self.settings.get(&kind)
    }

    /// Construct the provider for `kind` at `tier`.
    pub fn build(&self, kind: ProviderKind, tier: Tier) -> Result<Provider> {
        if let Some(e) = self.load_errors.get(&kind) {
            return Err(Error::Config(e.clone()));
        }
        let default = ProviderSettings::default();
        let settings = self.settings.get(&kind).unwrap_or(&default);
        Provider::build(kind, tier, settings)
    }

    /// Vendors that would construct successfully at the fast tier.
    pub fn available(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.build(*k, Tier::Fast).is_ok())
            .collect()
    }
}
