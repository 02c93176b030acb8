//! Compiler configuration
//!
//! Loads `CompilerConfig` from YAML and applies environment overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Which sources the fetch pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantPolicy {
    /// Every source, whatever its container.
    #[default]
    AcceptAll,
    /// Base sources plus sources of the default container.
    DefaultContainerOnly,
}

impl TenantPolicy {
    pub fn accepts(&self, source_container: Option<&str>, default_container: Option<&str>) -> bool {
        match self {
            Self::AcceptAll => true,
            Self::DefaultContainerOnly => {
                source_container.is_none() || source_container == default_container
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Concurrent source fetches.
    pub fetch_workers: usize,
    /// Concurrent per-container compile units.
    pub compile_workers: usize,
    /// Containers base definitions are propagated into. Empty means every
    /// container seen in the batch.
    pub enabled_containers: Vec<String>,
    pub tenant_policy: TenantPolicy,
    pub default_container: Option<String>,
    /// Prefix of generated field `dms_type` values.
    pub model_prefix: String,
    /// Derive identifiers through the callback instead of trusting the source.
    pub update_identifiers: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            fetch_workers: cpus,
            compile_workers: cpus * 2,
            enabled_containers: Vec::new(),
            tenant_policy: TenantPolicy::AcceptAll,
            default_container: None,
            model_prefix: "emf:".to_string(),
            update_identifiers: false,
        }
    }
}

pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Resolve the config file.
    ///
    /// Path resolution order:
    /// 1. DEFC_CONFIG environment variable (explicit override)
    /// 2. Relative "defc.yaml" (works when running from the project root)
    /// 3. Built-in defaults
    pub fn from_env() -> Self {
        if let Ok(path) = std::env::var("DEFC_CONFIG") {
            return Self::new(path);
        }
        if Path::new("defc.yaml").exists() {
            return Self::new("defc.yaml");
        }
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the file (if any), then apply environment overrides.
    pub fn load(&self) -> Result<CompilerConfig> {
        let mut config = match &self.path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let config: CompilerConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                info!("Loaded compiler config from {}", path.display());
                config
            }
            None => {
                debug!("No config file found, using defaults");
                CompilerConfig::default()
            }
        };
        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }
}

/// `DEFC_FETCH_WORKERS`, `DEFC_COMPILE_WORKERS`, `DEFC_CONTAINERS` (comma
/// separated) win over file values.
pub fn apply_env_overrides(
    config: &mut CompilerConfig,
    var: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(v) = var("DEFC_FETCH_WORKERS") {
        config.fetch_workers = v
            .trim()
            .parse()
            .with_context(|| format!("DEFC_FETCH_WORKERS is not a number: {v}"))?;
    }
    if let Some(v) = var("DEFC_COMPILE_WORKERS") {
        config.compile_workers = v
            .trim()
            .parse()
            .with_context(|| format!("DEFC_COMPILE_WORKERS is not a number: {v}"))?;
    }
    if let Some(v) = var("DEFC_CONTAINERS") {
        config.enabled_containers = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    Ok(())
}
