use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ClientConfig;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub service: Option<ServiceConfig>,
    pub throttle: Option<ThrottleConfig>,
    pub search: Option<SearchConfig>,
    pub capabilities: Option<CapabilitiesConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub min_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub batch_size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    pub strict: Option<bool>,
}

impl ConfigFile {
    /// Fold the values present in this file into `config`.
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(service) = &self.service {
            if let Some(url) = &service.base_url {
                config.base_url = url.clone();
            }
            if let Some(agent) = &service.user_agent {
                config.user_agent = agent.clone();
            }
            if let Some(secs) = service.timeout_secs {
                config.timeout_secs = secs;
            }
        }
        if let Some(ms) = self.throttle.as_ref().and_then(|t| t.min_interval_ms) {
            config.min_interval_ms = ms;
        }
        if let Some(batch) = self.search.as_ref().and_then(|s| s.batch_size) {
            config.search_batch_size = batch;
        }
        if let Some(strict) = self.capabilities.as_ref().and_then(|c| c.strict) {
            config.strict_capabilities = strict;
        }
    }

    /// Defaults with this file applied.
    pub fn to_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        self.apply(&mut config);
        config
    }
}

/// Platform config directory path: `<config_dir>/togows/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("togows").join("config.toml"))
}

/// Load config by cascading CWD `.togows.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".togows.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
            None
        }
    }
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        service: Some(ServiceConfig {
            base_url: overlay
                .service
                .as_ref()
                .and_then(|s| s.base_url.clone())
                .or_else(|| base.service.as_ref().and_then(|s| s.base_url.clone())),
            user_agent: overlay
                .service
                .as_ref()
                .and_then(|s| s.user_agent.clone())
                .or_else(|| base.service.as_ref().and_then(|s| s.user_agent.clone())),
            timeout_secs: overlay
                .service
                .as_ref()
                .and_then(|s| s.timeout_secs)
                .or_else(|| base.service.as_ref().and_then(|s| s.timeout_secs)),
        }),
        throttle: Some(ThrottleConfig {
            min_interval_ms: overlay
                .throttle
                .as_ref()
                .and_then(|t| t.min_interval_ms)
                .or_else(|| base.throttle.as_ref().and_then(|t| t.min_interval_ms)),
        }),
        search: Some(SearchConfig {
            batch_size: overlay
                .search
                .as_ref()
                .and_then(|s| s.batch_size)
                .or_else(|| base.search.as_ref().and_then(|s| s.batch_size)),
        }),
        capabilities: Some(CapabilitiesConfig {
            strict: overlay
                .capabilities
                .as_ref()
                .and_then(|c| c.strict)
                .or_else(|| base.capabilities.as_ref().and_then(|c| c.strict)),
        }),
    }
}

/// Save the current config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    save_to_path(config, &path)?;
    Ok(path)
}

/// Write `config` to `path`, creating parent directories.
pub fn save_to_path(config: &ConfigFile, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))
}
