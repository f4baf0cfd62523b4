//! Harvest loop controller: repeats harvest cycles until the run-time
//! budget is spent, persisting every successful ratio as it arrives.
//!
//! ```text
//! start (deadline = now + budget)
//!   |
//!   v
//! run cycle --success--> append line, sync
//!   |       --failure--> log, write nothing
//!   v
//! deadline passed or cancelled? --yes--> stop
//!   | no
//!   v
//! sleep attempt delay (cancellable) --> run cycle ...
//! ```
//!
//! A cycle in progress is never interrupted; the deadline and the
//! cancellation token are only consulted between cycles.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::analyzer::CoverageAnalyzer;
use crate::bridge::RemoteBridge;
use crate::config::SessionConfig;
use crate::cycle::{CycleOutcome, HarvestCycle};
use crate::error::{HarvestError, Result};

/// Record of one harvest attempt. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvestAttempt {
    /// 1-based attempt number within the run.
    pub attempt: u32,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the cycle in milliseconds.
    pub elapsed_ms: u64,
    pub outcome: CycleOutcome,
}

/// Everything that happened during one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HarvestReport {
    pub attempts: Vec<HarvestAttempt>,
    /// Whether the run ended because of cancellation rather than the
    /// deadline.
    pub interrupted: bool,
}

impl HarvestReport {
    pub fn successes(&self) -> usize {
        self.attempts.iter().filter(|a| a.outcome.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.attempts.len() - self.successes()
    }

    /// The most recent successful ratio, if any.
    pub fn last_ratio(&self) -> Option<f64> {
        self.attempts
            .iter()
            .rev()
            .find_map(|a| a.outcome.ratio())
            .map(|r| r.value())
    }
}

/// Append-only text file with one coverage line per successful cycle.
///
/// Every write is flushed and synced before returning, so a crash never
/// loses an earlier result.
#[derive(Debug)]
pub struct ResultLog {
    path: PathBuf,
    file: File,
}

impl ResultLog {
    /// Open (or create) `path` for appending.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| HarvestError::Output {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line and make it durable.
    pub async fn append_line(&mut self, line: &str) -> Result<()> {
        let io = async {
            self.file.write_all(line.as_bytes()).await?;
            self.file.flush().await?;
            self.file.sync_data().await
        };
        io.await.map_err(|source| HarvestError::Output {
            path: self.path.display().to_string(),
            source,
        })
    }
}

/// Drives harvest cycles within the session's run-time budget.
pub struct HarvestLoop {
    config: SessionConfig,
    bridge: Box<dyn RemoteBridge>,
    analyzer: Box<dyn CoverageAnalyzer>,
    attempt_log: Option<PathBuf>,
}

impl HarvestLoop {
    pub fn new(
        config: SessionConfig,
        bridge: Box<dyn RemoteBridge>,
        analyzer: Box<dyn CoverageAnalyzer>,
    ) -> Self {
        Self {
            config,
            bridge,
            analyzer,
            attempt_log: None,
        }
    }

    /// Also write every attempt, failures included, as JSON lines to `path`.
    pub fn with_attempt_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.attempt_log = Some(path.into());
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run until the budget is spent or `cancel` fires.
    ///
    /// At least one cycle always runs. Individual cycle failures are logged
    /// and skipped; only output I/O errors end the run early with `Err`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<HarvestReport> {
        let start = Instant::now();
        let deadline = Deadline::new(start, self.config.budget());

        let mut output = ResultLog::open(self.config.output()).await?;
        let mut attempt_log = match &self.attempt_log {
            Some(path) => Some(ResultLog::open(path).await?),
            None => None,
        };

        tracing::info!(
            artifact = %self.config.remote_artifact_path(),
            target = self.config.target().unwrap_or("<default>"),
            bridge = self.bridge.name(),
            analyzer = self.analyzer.name(),
            budget_secs = self.config.budget().map(|b| b.as_secs()),
            output = %output.path().display(),
            "starting coverage harvest"
        );

        let cycle = HarvestCycle::new(&self.config, self.bridge.as_ref(), self.analyzer.as_ref());
        let mut report = HarvestReport::default();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            tracing::info!(attempt, "starting harvest cycle");

            let cycle_start = Instant::now();
            let outcome = cycle.run().await;
            let elapsed = cycle_start.elapsed();

            match &outcome {
                CycleOutcome::Success(summary) => {
                    output.append_line(&summary.ratio.output_line()).await?;
                    tracing::info!(
                        attempt,
                        elapsed_secs = elapsed.as_secs_f64(),
                        coverage = %summary.ratio,
                        "harvest cycle succeeded"
                    );
                }
                CycleOutcome::Failure { kind, message } => {
                    tracing::warn!(
                        attempt,
                        elapsed_secs = elapsed.as_secs_f64(),
                        kind = %kind,
                        error = %message,
                        "harvest cycle failed, no result recorded"
                    );
                }
            }

            let record = HarvestAttempt {
                attempt,
                timestamp: Utc::now(),
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                outcome,
            };
            if let Some(log) = attempt_log.as_mut() {
                let mut line = serde_json::to_string(&record).map_err(|e| HarvestError::Output {
                    path: log.path().display().to_string(),
                    source: std::io::Error::other(e),
                })?;
                line.push('\n');
                log.append_line(&line).await?;
            }
            report.attempts.push(record);

            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            if deadline.passed() {
                break;
            }

            if !self.delay(self.config.attempt_delay(), &cancel).await {
                report.interrupted = true;
                break;
            }
            if deadline.passed() {
                break;
            }
        }

        tracing::info!(
            attempts = report.attempts.len(),
            successes = report.successes(),
            failures = report.failures(),
            interrupted = report.interrupted,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "coverage harvest finished"
        );

        Ok(report)
    }

    /// Sleep between attempts. Returns `false` if cancelled while waiting.
    async fn delay(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

/// When the loop stops starting new cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deadline {
    /// No budget: already passed, so exactly one cycle runs.
    Once,
    At(Instant),
    /// The budget is past what `Instant` can represent.
    Never,
}

impl Deadline {
    fn new(start: Instant, budget: Option<Duration>) -> Self {
        match budget {
            None => Self::Once,
            Some(budget) => start.checked_add(budget).map_or(Self::Never, Self::At),
        }
    }

    fn passed(self) -> bool {
        match self {
            Self::Once => true,
            Self::At(d) => Instant::now() >= d,
            Self::Never => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_budget_is_always_past_deadline() {
        assert!(Deadline::new(Instant::now(), None).passed());
    }

    #[test]
    fn future_deadline_is_not_passed() {
        assert!(!Deadline::new(Instant::now(), Some(Duration::from_secs(60))).passed());
        assert!(Deadline::At(Instant::now()).passed());
    }

    #[test]
    fn unrepresentable_deadline_never_passes() {
        let deadline = Deadline::new(Instant::now(), Some(Duration::from_secs(i64::MAX as u64)));
        assert_eq!(deadline, Deadline::Never);
        assert!(!deadline.passed());
    }

    #[tokio::test]
    async fn result_log_appends_across_opens() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("coverage.txt");

        let mut log = ResultLog::open(&path).await.unwrap();
        log.append_line("10.00000%\n").await.unwrap();
        drop(log);

        let mut log = ResultLog::open(&path).await.unwrap();
        log.append_line("20.00000%\n").await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "10.00000%\n20.00000%\n");
    }

    #[tokio::test]
    async fn result_log_open_fails_for_missing_dir() {
        let err = ResultLog::open(Path::new("/nonexistent/covharvest/out.txt"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn report_counts() {
        use crate::error::ErrorKind;
        use crate::record::CoverageRatio;
        use crate::cycle::CycleSummary;

        let ok = |n| HarvestAttempt {
            attempt: n,
            timestamp: Utc::now(),
            elapsed_ms: 1,
            outcome: CycleOutcome::Success(CycleSummary {
                ratio: CoverageRatio::from_counts(n as u64, 10).unwrap(),
                covered: n as u64,
                missed: 10 - n as u64,
                total: 10,
                classes: 1,
            }),
        };
        let failed = HarvestAttempt {
            attempt: 2,
            timestamp: Utc::now(),
            elapsed_ms: 1,
            outcome: CycleOutcome::Failure {
                kind: ErrorKind::Transfer,
                message: "gone".into(),
            },
        };

        let report = HarvestReport {
            attempts: vec![ok(1), failed, ok(3)],
            interrupted: false,
        };
        assert_eq!(report.successes(), 2);
        assert_eq!(report.failures(), 1);
        assert_eq!(report.last_ratio(), Some(0.3));
    }
}
