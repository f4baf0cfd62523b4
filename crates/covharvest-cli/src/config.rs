//! Configuration file management for covharvest.
//!
//! Provides a TOML config file at `~/.config/covharvest/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use covharvest_core::analyzer::JacocoCliConfig;
use covharvest_core::bridge::{AdbConfig, DEFAULT_BROADCAST_ACTION, DEFAULT_EXTRA_KEY};
use covharvest_core::config::{DEFAULT_ATTEMPT_DELAY, DEFAULT_SETTLE_INTERVAL};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub adb: AdbSection,
    pub jacoco: JacocoSection,
    pub timing: TimingSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbSection {
    /// The `adb` executable.
    pub path: PathBuf,
    /// Broadcast action that makes the app dump coverage.
    pub broadcast_action: String,
    /// Intent extra carrying the artifact name.
    pub extra_key: String,
    pub timeout_secs: u64,
}

impl Default for AdbSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("adb"),
            broadcast_action: DEFAULT_BROADCAST_ACTION.to_string(),
            extra_key: DEFAULT_EXTRA_KEY.to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JacocoSection {
    /// The `java` executable.
    pub java: PathBuf,
    /// Path to `jacococli.jar`.
    pub cli_jar: PathBuf,
    pub timeout_secs: u64,
}

impl Default for JacocoSection {
    fn default() -> Self {
        Self {
            java: PathBuf::from("java"),
            cli_jar: PathBuf::from("jacococli.jar"),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    /// Wait between trigger and transfer, in milliseconds.
    pub settle_ms: u64,
    /// Wait between cycles, in milliseconds.
    pub delay_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            settle_ms: DEFAULT_SETTLE_INTERVAL.as_millis() as u64,
            delay_ms: DEFAULT_ATTEMPT_DELAY.as_millis() as u64,
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the covharvest config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/covharvest` or
/// `~/.config/covharvest`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("covharvest");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("covharvest")
}

/// Return the path to the covharvest config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load the config file at `path`. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigFile::default()),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Serialize and write `config` to `path`, creating parent dirs as needed.
pub fn save_config_to(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Tool settings given on the command line. `None` defers to the next link
/// in the resolution chain.
#[derive(Debug, Default, Clone)]
pub struct ToolOverrides {
    pub adb: Option<PathBuf>,
    pub java: Option<PathBuf>,
    pub jacoco_cli: Option<PathBuf>,
    pub settle_ms: Option<u64>,
    pub delay_ms: Option<u64>,
}

/// Fully resolved tool configuration, ready for use.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub adb: AdbConfig,
    pub jacoco: JacocoCliConfig,
    pub settle_interval: Duration,
    pub attempt_delay: Duration,
}

impl ToolConfig {
    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// - adb: `--adb` > `COVHARVEST_ADB` > `adb.path`
    /// - java: `--java` > `COVHARVEST_JAVA` > `jacoco.java`
    /// - jacococli.jar: `--jacoco-cli` > `COVHARVEST_JACOCO_CLI` > `jacoco.cli_jar`
    /// - timing: `--settle-ms` / `--delay-ms` > `timing.*`
    pub fn resolve(cli: &ToolOverrides) -> Result<Self> {
        let file = load_config_from(&config_path())?;
        Ok(Self::resolve_with(cli, file))
    }

    pub(crate) fn resolve_with(cli: &ToolOverrides, file: ConfigFile) -> Self {
        let pick = |flag: &Option<PathBuf>, env: &str, fallback: PathBuf| {
            flag.clone()
                .or_else(|| std::env::var_os(env).map(PathBuf::from))
                .unwrap_or(fallback)
        };

        let adb = AdbConfig {
            adb: pick(&cli.adb, "COVHARVEST_ADB", file.adb.path),
            broadcast_action: file.adb.broadcast_action,
            extra_key: file.adb.extra_key,
            timeout: Duration::from_secs(file.adb.timeout_secs.max(1)),
        };
        let jacoco = JacocoCliConfig {
            java: pick(&cli.java, "COVHARVEST_JAVA", file.jacoco.java),
            cli_jar: pick(&cli.jacoco_cli, "COVHARVEST_JACOCO_CLI", file.jacoco.cli_jar),
            timeout: Duration::from_secs(file.jacoco.timeout_secs.max(1)),
        };

        Self {
            adb,
            jacoco,
            settle_interval: Duration::from_millis(cli.settle_ms.unwrap_or(file.timing.settle_ms)),
            attempt_delay: Duration::from_millis(cli.delay_ms.unwrap_or(file.timing.delay_ms)),
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
