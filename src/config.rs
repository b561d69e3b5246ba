use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stratum_blocks::{BlockId, MaterialEquivalence, VariantRules};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("variant rules: {0}")]
    Rules(#[from] stratum_blocks::ConfigError),
}

/// Runtime settings for a [`crate::RegionService`], loaded from TOML.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Wall-clock budget per tick for the in-flight task.
    pub tick_budget_ms: u64,
    /// Undo layers kept per owner before the oldest becomes permanent.
    pub history_depth: usize,
    /// Undo layers kept per world.
    pub history_capacity: usize,
    pub max_selection_volume: usize,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    /// `[expected, actual]` type pairs that compare as equal.
    pub equivalent_materials: Vec<[BlockId; 2]>,
    pub variant_rules: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tick_budget_ms: 5,
            history_depth: 16,
            history_capacity: 64,
            max_selection_volume: 64 * 64 * 64,
            log_level: "info".to_string(),
            log_file: None,
            equivalent_materials: Vec::new(),
            variant_rules: None,
        }
    }
}

impl ServiceConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut cfg = Self::from_toml_str(&text)?;
        // rule files are looked up next to the config that names them
        if let (Some(rules), Some(dir)) = (cfg.variant_rules.as_mut(), path.parent()) {
            if rules.is_relative() {
                *rules = dir.join(&*rules);
            }
        }
        Ok(cfg)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn tick_budget(&self) -> Duration {
        Duration::from_millis(self.tick_budget_ms)
    }

    pub fn equivalence(&self) -> MaterialEquivalence {
        MaterialEquivalence::from_pairs(self.equivalent_materials.iter().map(|[e, a]| (*e, *a)))
    }

    /// Rules from `variant_rules`, or none when unset.
    pub fn load_variant_rules(&self) -> Result<VariantRules, ConfigError> {
        match &self.variant_rules {
            Some(path) => Ok(VariantRules::load_from_path(path)?),
            None => Ok(VariantRules::new()),
        }
    }
}
