//! Harvest cycle: one trigger -> settle -> transfer -> decode -> aggregate
//! pass.
//!
//! A cycle owns its own [`CoverageAggregator`] and reports exactly one
//! [`CycleOutcome`]. Any failing step aborts the rest of the cycle; nothing
//! it computed is visible outside it unless it succeeds.

use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;

use crate::aggregate::CoverageAggregator;
use crate::analyzer::CoverageAnalyzer;
use crate::bridge::RemoteBridge;
use crate::config::SessionConfig;
use crate::error::{ErrorKind, HarvestError, Result};
use crate::record::CoverageRatio;

/// Final counters of a successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleSummary {
    pub ratio: CoverageRatio,
    pub covered: u64,
    pub missed: u64,
    pub total: u64,
    pub classes: u64,
}

/// The single outcome of one harvest cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Success(CycleSummary),
    Failure { kind: ErrorKind, message: String },
}

impl CycleOutcome {
    pub fn ratio(&self) -> Option<CoverageRatio> {
        match self {
            Self::Success(summary) => Some(summary.ratio),
            Self::Failure { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<Result<CycleSummary>> for CycleOutcome {
    fn from(result: Result<CycleSummary>) -> Self {
        match result {
            Ok(summary) => Self::Success(summary),
            Err(e) => Self::Failure {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

/// Runs harvest cycles against one bridge and analyzer.
pub struct HarvestCycle<'a> {
    config: &'a SessionConfig,
    bridge: &'a dyn RemoteBridge,
    analyzer: &'a dyn CoverageAnalyzer,
}

impl<'a> HarvestCycle<'a> {
    pub fn new(
        config: &'a SessionConfig,
        bridge: &'a dyn RemoteBridge,
        analyzer: &'a dyn CoverageAnalyzer,
    ) -> Self {
        Self {
            config,
            bridge,
            analyzer,
        }
    }

    /// Run one full cycle and classify the result.
    pub async fn run(&self) -> CycleOutcome {
        self.try_run().await.into()
    }

    /// Run one full cycle, propagating the first failing step's error.
    ///
    /// 1. Trigger a dump of the configured artifact.
    /// 2. Wait the settle interval (blind; the device gives no signal).
    /// 3. Transfer the artifact into the staging directory.
    /// 4. Decode it and stream per-class records from the analyzer.
    /// 5. Fold the records into a fresh aggregator.
    /// 6. Compute the ratio.
    pub async fn try_run(&self) -> Result<CycleSummary> {
        let cfg = self.config;
        let target = cfg.target();

        self.bridge.trigger(target, cfg.artifact_name()).await?;

        self.settle(cfg.settle_interval()).await;

        let local = cfg.local_artifact_path();
        // A stale copy from an earlier cycle must not pass for a fresh one.
        match tokio::fs::remove_file(&local).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HarvestError::Transfer(format!(
                    "failed to clear stale artifact {}: {e}",
                    local.display()
                )));
            }
        }

        let remote = cfg.remote_artifact_path();
        self.bridge
            .transfer(target, &remote, cfg.staging_dir())
            .await?;
        if !tokio::fs::try_exists(&local).await.unwrap_or(false) {
            return Err(HarvestError::Transfer(format!(
                "{remote} was not found at {} after transfer",
                local.display()
            )));
        }

        let data = self.analyzer.decode(&local).await?;
        tracing::debug!(
            sessions = data.sessions().len(),
            classes = data.class_count(),
            probes_hit = data.covered_probe_count(),
            "decoded execution data"
        );

        let mut records = self.analyzer.analyze(&data, cfg.class_inputs()).await?;
        let mut aggregator = CoverageAggregator::new();
        while let Some(record) = records.next().await {
            aggregator.accept(&record?);
        }

        let ratio = aggregator.ratio()?;
        tracing::info!(
            covered = aggregator.sum_covered(),
            missed = aggregator.sum_missed(),
            total = aggregator.sum_total(),
            classes = aggregator.classes(),
            "method coverage {ratio}"
        );

        Ok(CycleSummary {
            ratio,
            covered: aggregator.sum_covered(),
            missed: aggregator.sum_missed(),
            total: aggregator.sum_total(),
            classes: aggregator.classes(),
        })
    }

    /// Bridge the gap between "trigger accepted" and "artifact written".
    async fn settle(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let start = Instant::now();
        tokio::time::sleep(interval).await;
        tracing::trace!(waited_ms = start.elapsed().as_millis() as u64, "settled");
    }
}
