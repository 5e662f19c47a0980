//! Configuration management module
//!
//! Configuration is read from YAML, then environment overrides are applied.
//! A missing file is not an error: defaults match the host application's
//! production endpoints.

use std::path::{Path, PathBuf};

use report_tap::TapConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{LensError, LensResult};
use crate::metadata::MetadataConfig;
use crate::replay::ReplayConfig;
use crate::resolve::ResolverConfig;

pub const ENV_STORE_PATH: &str = "LENS_STORE_PATH";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "LENS_REQUEST_TIMEOUT_MS";
pub const ENV_MAX_CONCURRENT_REPLAYS: &str = "LENS_MAX_CONCURRENT_REPLAYS";
pub const ENV_RETAIN_ARTIFACTS: &str = "LENS_RETAIN_ARTIFACTS";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot file; the in-memory store is used when unset.
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LensConfig {
    pub tap: TapConfig,
    pub replay: ReplayConfig,
    pub resolver: ResolverConfig,
    pub metadata: MetadataConfig,
    pub store: StoreConfig,
    /// Keep persisted collections after the artifact has been handed off.
    pub retain_artifacts: bool,
    pub event_buffer: usize,
}

impl Default for LensConfig {
    fn default() -> Self {
        Self {
            tap: TapConfig::default(),
            replay: ReplayConfig::default(),
            resolver: ResolverConfig::default(),
            metadata: MetadataConfig::default(),
            store: StoreConfig::default(),
            retain_artifacts: false,
            event_buffer: 64,
        }
    }
}

impl LensConfig {
    pub fn from_yaml(raw: &str) -> LensResult<Self> {
        serde_yaml::from_str(raw).map_err(|err| LensError::Config(err.to_string()))
    }

    pub fn apply_env_overrides(&mut self) -> LensResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> LensResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_STORE_PATH) {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            self.replay.request_timeout_ms = parse_override(ENV_REQUEST_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT_REPLAYS) {
            self.replay.max_concurrent = parse_override(ENV_MAX_CONCURRENT_REPLAYS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RETAIN_ARTIFACTS) {
            self.retain_artifacts = parse_override(ENV_RETAIN_ARTIFACTS, &raw)?;
        }
        Ok(())
    }
}

fn parse_override<T>(name: &str, raw: &str) -> LensResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| LensError::Config(format!("{name}={raw}: {err}")))
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push("factsheet-lens");
        path.push("config.yaml");
        path
    })
}

/// Loads configuration from `path` (or the default location) and applies
/// environment overrides.
pub async fn load_config(path: Option<&Path>) -> LensResult<LensConfig> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path(),
    };

    let mut config = match path {
        Some(path) if path.exists() => {
            let content = tokio::fs::read_to_string(&path).await?;
            let config = LensConfig::from_yaml(&content)?;
            info!(target: "config", path = %path.display(), "loaded configuration");
            config
        }
        Some(path) => {
            warn!(
                target: "config",
                path = %path.display(),
                "config file not found, using defaults"
            );
            LensConfig::default()
        }
        None => LensConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = LensConfig::from_yaml(
            "retain_artifacts: true\nreplay:\n  max_concurrent: 2\ntap:\n  host_suffix: example.net\n",
        )
        .expect("yaml");
        assert!(config.retain_artifacts);
        assert_eq!(config.replay.max_concurrent, 2);
        assert_eq!(config.replay.request_timeout_ms, ReplayConfig::default().request_timeout_ms);
        assert_eq!(config.tap.host_suffix.as_deref(), Some("example.net"));
        assert_eq!(config.tap.correlation_param, "bookmarkId");
    }

    #[test]
    fn overrides_are_applied_and_validated() {
        let mut config = LensConfig::default();
        config
            .apply_overrides_from(|name| match name {
                ENV_STORE_PATH => Some("/tmp/lens.json".to_string()),
                ENV_MAX_CONCURRENT_REPLAYS => Some("3".to_string()),
                ENV_RETAIN_ARTIFACTS => Some("true".to_string()),
                _ => None,
            })
            .expect("overrides");
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/lens.json")));
        assert_eq!(config.replay.max_concurrent, 3);
        assert!(config.retain_artifacts);

        let err = config
            .apply_overrides_from(|name| {
                (name == ENV_REQUEST_TIMEOUT_MS).then(|| "soon".to_string())
            })
            .unwrap_err();
        assert!(err.to_string().contains(ENV_REQUEST_TIMEOUT_MS));
    }
}
