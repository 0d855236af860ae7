//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use ct_core::{AggregatorConfig, TimerConfig};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the session snapshot document.
    pub snapshot_path: PathBuf,

    /// Aggregation thresholds.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Timer cadences for `ct run`.
    #[serde(default)]
    pub timers: TimerConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("snapshot_path", &self.snapshot_path)
            .field("aggregator", &self.aggregator)
            .field("timers", &self.timers)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            snapshot_path: data_dir.join("session.json"),
            aggregator: AggregatorConfig::default(),
            timers: TimerConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // CT_SNAPSHOT_PATH, CT_AGGREGATOR__IDLE_THRESHOLD_MS, ...
        figment = figment.merge(Env::prefixed("CT_").split("__"));

        figment.extract()
    }

    /// Aggregator thresholds with the idle tick credit tied to the idle timer.
    ///
    /// Each idle tick credits one tick interval, so the two must agree. A
    /// disabled idle timer leaves the configured credit untouched.
    pub fn effective_aggregator(&self) -> AggregatorConfig {
        let mut aggregator = self.aggregator.clone();
        if self.timers.idle_check_interval_ms > 0 {
            aggregator.idle_check_interval_ms =
                i64::try_from(self.timers.idle_check_interval_ms).unwrap_or(i64::MAX);
        }
        aggregator
    }
}

/// Returns the platform-specific config directory for ct.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ct"))
}

/// Returns the platform-specific data directory for ct.
///
/// On Linux: `~/.local/share/ct`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("ct"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_data_path_ends_with_ct() {
        let path = dirs_data_path().unwrap();
        assert_eq!(path.file_name().unwrap(), "ct");
    }

    #[test]
    fn test_default_config_uses_data_dir_for_snapshot() {
        let config = Config::default();
        let data_dir = dirs_data_path().unwrap();
        assert_eq!(config.snapshot_path, data_dir.join("session.json"));
        assert_eq!(config.aggregator.idle_threshold_ms, 180_000);
        assert_eq!(config.timers.heartbeat_interval_ms, 1_000);
    }

    #[test]
    fn test_config_file_overrides_nested_sections() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
snapshot_path = "/tmp/ct-test/session.json"

[aggregator]
idle_threshold_ms = 60000

[timers]
persist_interval_ms = 0
"#,
        )
        .unwrap();

        let config = Config::load_from(Some(&path)).unwrap();
        assert_eq!(
            config.snapshot_path,
            PathBuf::from("/tmp/ct-test/session.json")
        );
        assert_eq!(config.aggregator.idle_threshold_ms, 60_000);
        assert_eq!(config.aggregator.edit_gap_cap_ms, 30_000);
        assert_eq!(config.timers.persist_interval_ms, 0);
        assert_eq!(config.timers.heartbeat_interval_ms, 1_000);
    }

    #[test]
    fn test_effective_aggregator_follows_idle_timer() {
        let mut config = Config::default();
        config.timers.idle_check_interval_ms = 15_000;
        assert_eq!(config.effective_aggregator().idle_check_interval_ms, 15_000);

        config.timers.idle_check_interval_ms = 0;
        config.aggregator.idle_check_interval_ms = 42;
        assert_eq!(config.effective_aggregator().idle_check_interval_ms, 42);
    }
}
