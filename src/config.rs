/*============================================================
  Synavera Project: Syn-Pilot
  Module: synpilot_core::config
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Load and validate Syn-Pilot-Core configuration from TOML,
    layering operator overrides on deterministic defaults.

  Security / Safety Notes:
    Configuration may name a composer binary override; the path
    is executed verbatim and must be operator-controlled.

  Dependencies:
    toml + serde for parsing, dirs for the default config root.

  Operational Scope:
    Consumed by the entry point and handed down to the queue,
    composer, registry, and callback layers at construction.

  Revision History:
    2025-06-17 COD  Authored configuration loader.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Defaults mirror the managed-host layout
    - Explicit validation with actionable diagnostics
    - No global mutable state; handles are passed explicitly
============================================================*/

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, SynpilotError};

/// Relative location of the pending-task file under the project root.
const QUEUE_RELATIVE_PATH: &str = "storage/framework/synpilot_update_scheduled";

/// Top-level Syn-Pilot-Core configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynpilotConfig {
    /// Root of the managed Composer project.
    pub project_root: PathBuf,
    /// Override for the pending-task file location.
    pub queue_path: Option<PathBuf>,
    /// Override for the session log directory.
    pub log_dir: Option<PathBuf>,
    pub composer: ComposerConfig,
    pub registry: RegistryConfig,
    pub callback: CallbackConfig,
    pub marketplace: MarketplaceConfig,
}

/// Settings for composer process invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Explicit composer binary; used verbatim when set.
    pub binary: Option<PathBuf>,
    /// Wall-clock limit for update/install runs, in seconds.
    pub timeout: u64,
    /// Ordered system directories searched for php/composer.
    pub bin_dirs: Vec<PathBuf>,
}

/// Settings for the public package registry client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub base_url: String,
    pub timeout: u64,
}

/// Settings for outbound callback reporting.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Optional request timeout in seconds; absent means unbounded.
    pub timeout: Option<u64>,
}

/// Settings for the plugin marketplace gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    pub gateway_url: String,
    /// Hosts below protocol v2 require the legacy request attributes.
    pub legacy_protocol: bool,
}

impl Default for SynpilotConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            queue_path: None,
            log_dir: None,
            composer: ComposerConfig::default(),
            registry: RegistryConfig::default(),
            callback: CallbackConfig::default(),
            marketplace: MarketplaceConfig::default(),
        }
    }
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            binary: None,
            timeout: 600,
            bin_dirs: [
                "/usr/local/bin",
                "/usr/bin",
                "/usr/sbin",
                "/bin",
                "/sbin",
            ]
            .iter()
            .map(PathBuf::from)
            .collect(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://packagist.org".to_string(),
            timeout: 30,
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { timeout: None }
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://gateway.octobercms.com/api".to_string(),
            legacy_protocol: false,
        }
    }
}

impl SynpilotConfig {
    /// Load configuration from an explicit path, the default location,
    /// or built-in defaults when no file exists.
    pub fn load_from_optional_path(path: Option<&Path>) -> Result<Self> {
        let candidate = match path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(SynpilotError::Config(format!(
                        "Configuration file {} not found",
                        explicit.display()
                    )));
                }
                Some(explicit.to_path_buf())
            }
            None => Self::default_config_path().filter(|p| p.exists()),
        };

        let Some(file_path) = candidate else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(&file_path).map_err(|err| {
            SynpilotError::Filesystem(format!(
                "Failed to read configuration {}: {err}",
                file_path.display()
            ))
        })?;

        let config: SynpilotConfig = toml::from_str(&content).map_err(|err| {
            SynpilotError::Config(format!(
                "Failed to parse configuration {}: {err}",
                file_path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Resolved location of the pending-task file.
    pub fn queue_path(&self) -> PathBuf {
        self.queue_path
            .clone()
            .unwrap_or_else(|| self.project_root.join(QUEUE_RELATIVE_PATH))
    }

    /// Resolved session log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.project_root.join("storage/logs/synpilot"))
    }

    fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("synpilot").join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.composer.timeout == 0 {
            return Err(SynpilotError::Config(
                "composer.timeout must be greater than zero".into(),
            ));
        }
        if self.registry.base_url.trim().is_empty() {
            return Err(SynpilotError::Config(
                "registry.base_url must not be empty".into(),
            ));
        }
        Ok(())
    }
}
