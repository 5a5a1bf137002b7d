//! Configuration resolution for voxrelay.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/voxrelay/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::reconcile::FinishPolicy;

/// Complete voxrelay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub journal: JournalConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            engine: EngineConfig::default(),
            journal: JournalConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Relay server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Sessions silent for longer than this are disconnected.
    pub liveness_window_secs: u64,
    /// Per-session outbound queue depth before a session counts as stalled.
    pub outbound_capacity: usize,
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            liveness_window_secs: 60,
            outbound_capacity: 256,
            max_frame_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl ServerConfig {
    pub const fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_secs)
    }
}

/// Reconciliation engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dictation keyword that closes a segment (case-insensitive).
    pub trigger_keyword: String,
    pub finish_policy: FinishPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trigger_keyword: "done".to_string(),
            finish_policy: FinishPolicy::default(),
        }
    }
}

/// Journal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    pub queue_capacity: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            queue_capacity: 1024,
        }
    }
}

impl JournalConfig {
    /// Configured journal path, falling back to the platform data directory.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(default_journal_path)
    }
}

impl Config {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.engine.trigger_keyword.trim().is_empty() {
            return Err(Error::Config("engine.trigger_keyword must not be empty".into()));
        }
        if self.server.liveness_window_secs == 0 {
            return Err(Error::Config(
                "server.liveness_window_secs must be greater than zero".into(),
            ));
        }
        if self.server.outbound_capacity == 0 {
            return Err(Error::Config(
                "server.outbound_capacity must be greater than zero".into(),
            ));
        }
        if self.journal.queue_capacity == 0 {
            return Err(Error::Config(
                "journal.queue_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        merge_json(&mut merged, read_config_value(&global_path)?);
    }

    if let Some(path) = explicit {
        merge_json(&mut merged, read_config_value(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("voxrelay").join("settings.json"))
}

/// Default journal location under the platform data directory.
pub fn default_journal_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("voxrelay").join("journal.log"))
}

fn read_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Deep-merge `overlay` into `base`. Objects merge key by key; any other
/// value in the overlay replaces the base value.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `VOXRELAY_*` overrides read through `lookup`.
///
/// A variable that is set but does not parse is a configuration error.
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(addr) = lookup("VOXRELAY_ADDR") {
        config.server.addr = parse_env("VOXRELAY_ADDR", &addr)?;
    }
    if let Some(keyword) = lookup("VOXRELAY_TRIGGER_KEYWORD") {
        config.engine.trigger_keyword = keyword;
    }
    if let Some(secs) = lookup("VOXRELAY_LIVENESS_SECS") {
        config.server.liveness_window_secs = parse_env("VOXRELAY_LIVENESS_SECS", &secs)?;
    }
    if let Some(path) = lookup("VOXRELAY_JOURNAL_PATH") {
        config.journal.path = Some(PathBuf::from(path));
    }
    if let Some(level) = lookup("VOXRELAY_LOG_LEVEL") {
        config.log_level = level;
    }
    Ok(())
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {key}={value:?}: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_use_done_keyword_and_retain_policy() {
        let config = Config::default();
        assert_eq!(config.engine.trigger_keyword, "done");
        assert_eq!(config.engine.finish_policy, FinishPolicy::Retain);
        assert_eq!(config.server.liveness_window(), Duration::from_secs(60));
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_only_overrides_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"engine": {"trigger_keyword": "JINX"}, "server": {"liveness_window_secs": 5}}"#,
        )
        .unwrap();

        let mut merged = serde_json::to_value(Config::default()).unwrap();
        merge_json(&mut merged, read_config_value(&path).unwrap());
        let config: Config = serde_json::from_value(merged).unwrap();

        assert_eq!(config.engine.trigger_keyword, "JINX");
        assert_eq!(config.engine.finish_policy, FinishPolicy::Retain);
        assert_eq!(config.server.liveness_window_secs, 5);
        assert_eq!(config.server.outbound_capacity, 256);
    }

    #[test]
    fn finish_policy_parses_from_lowercase() {
        let config: Config =
            serde_json::from_str(r#"{"engine": {"finish_policy": "reset"}}"#).unwrap();
        assert_eq!(config.engine.finish_policy, FinishPolicy::Reset);
    }

    #[test]
    fn finish_policy_cli_names_match_file_names() {
        use clap::ValueEnum;
        for policy in FinishPolicy::value_variants() {
            let name = policy.to_possible_value().unwrap();
            let from_json: FinishPolicy =
                serde_json::from_value(serde_json::json!(name.get_name())).unwrap();
            assert_eq!(from_json, *policy);
        }
        assert_eq!(
            FinishPolicy::from_str("retain", false).unwrap(),
            FinishPolicy::Retain
        );
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("VOXRELAY_ADDR", "0.0.0.0:9000"),
            ("VOXRELAY_TRIGGER_KEYWORD", "over"),
            ("VOXRELAY_LIVENESS_SECS", "15"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(ToString::to_string)).unwrap();

        assert_eq!(config.server.addr.port(), 9000);
        assert_eq!(config.engine.trigger_keyword, "over");
        assert_eq!(config.server.liveness_window_secs, 15);
    }

    #[test]
    fn unparseable_env_override_is_rejected() {
        for (key, value) in [
            ("VOXRELAY_LIVENESS_SECS", "not-a-number"),
            ("VOXRELAY_ADDR", "localhost"),
        ] {
            let mut config = Config::default();
            let err = apply_env_overrides(&mut config, |k| (k == key).then(|| value.to_string()))
                .unwrap_err();
            let Error::Config(message) = err else {
                panic!("expected a config error for {key}");
            };
            assert!(message.contains(key), "{message}");
            assert_eq!(config.server.liveness_window_secs, 60);
        }
    }

    #[test]
    fn empty_keyword_rejected() {
        let mut config = Config::default();
        config.engine.trigger_keyword = "  ".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
