//! Harvest session configuration.
//!
//! A [`SessionConfig`] is built once, validated, and then only read for the
//! rest of the run. Use [`SessionConfig::builder`] with the required fields,
//! chain optional setters, and call [`SessionConfigBuilder::build`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bridge::remote_artifact_path;
use crate::error::{HarvestError, Result};

/// Blind wait between the dump trigger and the transfer.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_millis(300);

/// Wait between the end of one cycle and the start of the next.
pub const DEFAULT_ATTEMPT_DELAY: Duration = Duration::from_millis(3000);

/// Immutable settings for one harvest run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    target: Option<String>,
    artifact_name: String,
    remote_dir: String,
    staging_dir: PathBuf,
    class_inputs: PathBuf,
    output: PathBuf,
    budget: Option<Duration>,
    settle_interval: Duration,
    attempt_delay: Duration,
}

impl SessionConfig {
    /// Start a builder with the three required fields.
    pub fn builder(
        class_inputs: impl Into<PathBuf>,
        remote_dir: impl Into<String>,
        artifact_name: impl Into<String>,
    ) -> SessionConfigBuilder {
        SessionConfigBuilder {
            target: None,
            artifact_name: artifact_name.into(),
            remote_dir: remote_dir.into(),
            staging_dir: PathBuf::from("."),
            class_inputs: class_inputs.into(),
            output: PathBuf::from("coverage.txt"),
            budget: None,
            settle_interval: DEFAULT_SETTLE_INTERVAL,
            attempt_delay: DEFAULT_ATTEMPT_DELAY,
        }
    }

    /// Device identifier, or `None` for the default device.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    pub fn remote_dir(&self) -> &str {
        &self.remote_dir
    }

    /// `<remote_dir>/<artifact_name>` on the device.
    pub fn remote_artifact_path(&self) -> String {
        remote_artifact_path(&self.remote_dir, &self.artifact_name)
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Where the transferred artifact lands locally.
    pub fn local_artifact_path(&self) -> PathBuf {
        self.staging_dir.join(&self.artifact_name)
    }

    pub fn class_inputs(&self) -> &Path {
        &self.class_inputs
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Total run time. `None` means "run exactly one cycle".
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    pub fn settle_interval(&self) -> Duration {
        self.settle_interval
    }

    pub fn attempt_delay(&self) -> Duration {
        self.attempt_delay
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    target: Option<String>,
    artifact_name: String,
    remote_dir: String,
    staging_dir: PathBuf,
    class_inputs: PathBuf,
    output: PathBuf,
    budget: Option<Duration>,
    settle_interval: Duration,
    attempt_delay: Duration,
}

impl SessionConfigBuilder {
    /// Select a device. An empty identifier means the default device.
    pub fn target(mut self, target: Option<impl Into<String>>) -> Self {
        self.target = target.map(Into::into).filter(|t: &String| !t.is_empty());
        self
    }

    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = path.into();
        self
    }

    /// Set the run-time budget. Zero means "run once".
    pub fn budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget).filter(|b| !b.is_zero());
        self
    }

    /// Set the budget from a signed second count; zero or negative means
    /// "run once".
    pub fn budget_secs(self, secs: i64) -> Self {
        self.budget(Duration::from_secs(secs.max(0) as u64))
    }

    pub fn settle_interval(mut self, interval: Duration) -> Self {
        self.settle_interval = interval;
        self
    }

    pub fn attempt_delay(mut self, delay: Duration) -> Self {
        self.attempt_delay = delay;
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Config`] if the class inputs path, remote
    /// directory or artifact name is empty, or the artifact name contains a
    /// path separator.
    pub fn build(self) -> Result<SessionConfig> {
        let mut missing = Vec::new();
        if self.class_inputs.as_os_str().is_empty() {
            missing.push("class inputs path");
        }
        if self.remote_dir.trim().is_empty() {
            missing.push("remote artifact directory");
        }
        if self.artifact_name.trim().is_empty() {
            missing.push("artifact name");
        }
        if !missing.is_empty() {
            return Err(HarvestError::Config(format!(
                "missing required {}",
                missing.join(", ")
            )));
        }
        if self.artifact_name.contains('/') {
            return Err(HarvestError::Config(format!(
                "artifact name {:?} must be a bare file name",
                self.artifact_name
            )));
        }
        if self.output.as_os_str().is_empty() {
            return Err(HarvestError::Config("output path is empty".into()));
        }

        Ok(SessionConfig {
            target: self.target,
            artifact_name: self.artifact_name,
            remote_dir: self.remote_dir,
            staging_dir: if self.staging_dir.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                self.staging_dir
            },
            class_inputs: self.class_inputs,
            output: self.output,
            budget: self.budget,
            settle_interval: self.settle_interval,
            attempt_delay: self.attempt_delay,
        })
    }
}
