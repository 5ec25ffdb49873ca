//! Syncer configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Environment variable holding the path of the YAML config file
pub const CONFIG_PATH_ENV: &str = "L7LB_SYNCER_CONFIG";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncerConfig {
    /// Namespace to watch; all namespaces if unset
    pub watch_namespace: Option<String>,
    /// Zone of this node; endpoints hinted for it become preferred backends
    pub zone: Option<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Capacity of the resync request channel
    pub resync_buffer: usize,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            zone: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            resync_buffer: 256,
        }
    }
}

impl SyncerConfig {
    /// Load from the file named by `L7LB_SYNCER_CONFIG`, then apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(namespace) = env("L7LB_SYNCER_NAMESPACE") {
            self.watch_namespace = Some(namespace);
        }
        if let Some(zone) = env("L7LB_SYNCER_ZONE") {
            self.zone = Some(zone);
        }
        if let Some(format) = env("L7LB_SYNCER_LOG_FORMAT") {
            self.log_format = match format.as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => anyhow::bail!("unknown log format: {}", other),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SyncerConfig::default();
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.resync_buffer, 256);
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = SyncerConfig::from_yaml("zone: eu-west-1a\nlogFormat: json\n").unwrap();
        assert_eq!(config.zone.as_deref(), Some("eu-west-1a"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("L7LB_SYNCER_NAMESPACE", "team-a"),
            ("L7LB_SYNCER_LOG_FORMAT", "json"),
        ]);
        let mut config = SyncerConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.watch_namespace.as_deref(), Some("team-a"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.zone, None);
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        let mut config = SyncerConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "L7LB_SYNCER_LOG_FORMAT").then(|| "xml".to_string())
        });
        assert!(result.is_err());
    }
}
