//! Configuration loading and validation for torq-core.
//!
//! This module handles:
//! - Loading `config.toml` (bridge executable, device paths, timeouts, UI)
//! - Config resolution order (explicit > env > XDG > defaults)
//! - Semantic validation of the loaded values
//!
//! The resolved [`TorqConfig`] is immutable for the rest of the invocation
//! and is passed to every device and executor by reference.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use torq_common::{Error, Result};
use tracing::debug;

/// Default XDG config directory name.
const CONFIG_DIR_NAME: &str = "torq";

/// Config file name inside the config directory.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "TORQ_CONFIG";

/// Environment variable overriding the bridge executable.
pub const ADB_ENV_VAR: &str = "TORQ_ADB";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TorqConfig {
    /// Path or name of the adb executable.
    pub adb_path: PathBuf,
    /// Environment variable consulted for a serial when none is requested.
    pub serial_env_var: String,
    pub device: DeviceConfig,
    pub root: RootConfig,
    pub ui: UiConfig,
    pub simpleperf: SimpleperfConfig,
}

impl Default for TorqConfig {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            serial_env_var: "ANDROID_SERIAL".to_string(),
            device: DeviceConfig::default(),
            root: RootConfig::default(),
            ui: UiConfig::default(),
            simpleperf: SimpleperfConfig::default(),
        }
    }
}

/// Well-known on-device paths and properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Where perfetto writes the trace on the device.
    pub perfetto_trace_path: String,
    /// Where simpleperf writes its recording on the device.
    pub simpleperf_data_path: String,
    /// Property receiving hardware memory limits (`<n>G`), applied at next boot.
    pub memory_limit_prop: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            perfetto_trace_path: "/data/misc/perfetto-traces/trace.perfetto-trace".to_string(),
            simpleperf_data_path: "/data/local/tmp/perf.data".to_string(),
            memory_limit_prop: "persist.sys.torq.mem_limit".to_string(),
        }
    }
}

/// Post-root reconnect wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RootConfig {
    pub reconnect_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            reconnect_timeout_ms: 5000,
            poll_interval_ms: 500,
        }
    }
}

impl RootConfig {
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Trace viewer hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UiConfig {
    /// Loopback port the artifact is served from.
    pub port: u16,
    /// Origin of the trace viewer; also sent as `Access-Control-Allow-Origin`.
    pub origin: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            port: 9001,
            origin: "https://ui.perfetto.dev".to_string(),
        }
    }
}

/// Host-side simpleperf post-processing.
///
/// With `scripts_path` set, simpleperf recordings are also converted to a
/// Gecko profile after each pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimpleperfConfig {
    /// Directory holding `binary_cache_builder.py` and `gecko_profile_generator.py`.
    pub scripts_path: Option<PathBuf>,
    /// Directory of unstripped libraries used to symbolize samples.
    pub symbols_path: Option<PathBuf>,
}

impl TorqConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self> {
        let config: TorqConfig =
            toml::from_str(content).map_err(|e| Error::InvalidConfigFile {
                path: origin.display().to_string(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a specific config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfigFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.root.poll_interval_ms == 0 {
            return Err(Error::Config("root.poll_interval_ms must be positive".into()));
        }
        if self.root.poll_interval_ms > self.root.reconnect_timeout_ms {
            return Err(Error::Config(format!(
                "root.poll_interval_ms ({}) exceeds root.reconnect_timeout_ms ({})",
                self.root.poll_interval_ms, self.root.reconnect_timeout_ms
            )));
        }
        if self.ui.port == 0 {
            return Err(Error::Config("ui.port must be non-zero".into()));
        }
        if self.adb_path.as_os_str().is_empty() {
            return Err(Error::Config("adb_path must not be empty".into()));
        }
        Ok(())
    }

    /// Apply environment overrides that sit above any file.
    fn apply_env(mut self) -> Self {
        if let Ok(adb) = std::env::var(ADB_ENV_VAR) {
            if !adb.is_empty() {
                self.adb_path = PathBuf::from(adb);
            }
        }
        self
    }
}

/// Configuration resolution options.
#[derive(Debug, Default)]
pub struct ConfigOptions {
    /// Explicit config file (highest priority).
    pub config_path: Option<PathBuf>,
    /// Explicit config directory, consulted instead of the XDG location.
    pub config_dir: Option<PathBuf>,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit file (via ConfigOptions)
/// 2. Environment variable (TORQ_CONFIG)
/// 3. Config directory (explicit, else ~/.config/torq/config.toml)
/// 4. Built-in defaults
///
/// `TORQ_ADB` overrides the bridge executable regardless of source.
pub fn load_config(options: &ConfigOptions) -> Result<TorqConfig> {
    let config = match resolve_config_file(options) {
        Some(path) => {
            debug!(path = %path.display(), "loading config file");
            TorqConfig::from_file(&path)?
        }
        None => TorqConfig::default(),
    };
    let config = config.apply_env();
    config.validate()?;
    Ok(config)
}

/// Pick the file to load; `None` means defaults.
///
/// Explicit and env-provided files must exist; the directory candidate is optional.
fn resolve_config_file(options: &ConfigOptions) -> Option<PathBuf> {
    if let Some(path) = &options.config_path {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let dir = options
        .config_dir
        .clone()
        .or_else(|| dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME)))?;
    let candidate = dir.join(CONFIG_FILE_NAME);
    candidate.exists().then_some(candidate)
}
