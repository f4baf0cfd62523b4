//! Remote bridge: the seam between the harvest loop and the device.
//!
//! The loop only needs two things from a device: "dump coverage now" and
//! "copy this file to me". [`AdbBridge`] implements both on top of `adb`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::command::run_command;
use crate::error::{HarvestError, Result};

/// Broadcast action the instrumented app listens for.
pub const DEFAULT_BROADCAST_ACTION: &str = "com.llmdroid.jacoco.COLLECT_COVERAGE";

/// Intent extra carrying the artifact file name.
pub const DEFAULT_EXTRA_KEY: &str = "coverageFile";

/// Device communication used by a harvest cycle.
///
/// Both calls block until the underlying operation has a definitive
/// outcome. `target` selects a device; `None` means the single default one.
#[async_trait]
pub trait RemoteBridge: Send + Sync {
    /// Human-readable name for this bridge (e.g. "adb").
    fn name(&self) -> &str;

    /// Ask the target to write its coverage to `artifact_name`.
    ///
    /// Success only means the request was dispatched; the artifact may not
    /// exist yet when this returns.
    async fn trigger(&self, target: Option<&str>, artifact_name: &str) -> Result<()>;

    /// Copy `remote_path` from the target into `local_dir`.
    async fn transfer(&self, target: Option<&str>, remote_path: &str, local_dir: &Path)
    -> Result<()>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn RemoteBridge) {}
};

/// Join a remote directory and file name with exactly one `/`.
pub fn remote_artifact_path(remote_dir: &str, artifact_name: &str) -> String {
    let dir = remote_dir.trim_end_matches('/');
    let name = artifact_name.trim_start_matches('/');
    format!("{dir}/{name}")
}

/// Settings for the `adb` bridge.
#[derive(Debug, Clone)]
pub struct AdbConfig {
    /// The `adb` executable.
    pub adb: PathBuf,
    /// Intent action that makes the app dump coverage.
    pub broadcast_action: String,
    /// Intent string extra carrying the artifact name.
    pub extra_key: String,
    /// Upper bound on each `adb` invocation.
    pub timeout: Duration,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            adb: PathBuf::from("adb"),
            broadcast_action: DEFAULT_BROADCAST_ACTION.to_string(),
            extra_key: DEFAULT_EXTRA_KEY.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Remote bridge backed by the Android Debug Bridge.
#[derive(Debug, Clone, Default)]
pub struct AdbBridge {
    config: AdbConfig,
}

impl AdbBridge {
    pub fn new(config: AdbConfig) -> Self {
        Self { config }
    }

    fn base_args(target: Option<&str>) -> Vec<String> {
        match target.filter(|t| !t.is_empty()) {
            Some(serial) => vec!["-s".to_string(), serial.to_string()],
            None => Vec::new(),
        }
    }

    fn trigger_args(&self, target: Option<&str>, artifact_name: &str) -> Vec<String> {
        let mut args = Self::base_args(target);
        args.extend(
            [
                "shell",
                "am",
                "broadcast",
                "-a",
                self.config.broadcast_action.as_str(),
                "--es",
                self.config.extra_key.as_str(),
                artifact_name,
            ]
            .map(String::from),
        );
        args
    }

    fn transfer_args(target: Option<&str>, remote_path: &str, local_dir: &Path) -> Vec<String> {
        let mut args = Self::base_args(target);
        args.push("pull".to_string());
        args.push(remote_path.to_string());
        args.push(local_dir.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl RemoteBridge for AdbBridge {
    fn name(&self) -> &str {
        "adb"
    }

    async fn trigger(&self, target: Option<&str>, artifact_name: &str) -> Result<()> {
        let args = self.trigger_args(target, artifact_name);
        let output = run_command(&self.config.adb, &args, self.config.timeout)
            .await
            .map_err(|e| HarvestError::Trigger(format!("{e:#}")))?;

        if !output.success() {
            return Err(HarvestError::Trigger(format!(
                "adb broadcast {}",
                output.failure_summary()
            )));
        }
        Ok(())
    }

    async fn transfer(
        &self,
        target: Option<&str>,
        remote_path: &str,
        local_dir: &Path,
    ) -> Result<()> {
        let args = Self::transfer_args(target, remote_path, local_dir);
        let output = run_command(&self.config.adb, &args, self.config.timeout)
            .await
            .map_err(|e| HarvestError::Transfer(format!("{e:#}")))?;

        if !output.success() {
            return Err(HarvestError::Transfer(format!(
                "adb pull {remote_path} {}",
                output.failure_summary()
            )));
        }
        Ok(())
    }
}
