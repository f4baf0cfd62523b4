//! Shared test utilities for covharvest integration tests.
//!
//! Provides scripted stand-ins for the device bridge and the coverage
//! analyzer. Each fake is cheap to clone; clones share state, so a test can
//! hand one copy to the harvest loop and keep another to inspect calls.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use covharvest_core::analyzer::{CoverageAnalyzer, RecordStream};
use covharvest_core::bridge::RemoteBridge;
use covharvest_core::error::{HarvestError, Result};
use covharvest_core::exec::{self, ExecutionData};
use covharvest_core::record::CoverageRecord;

/// Bytes of a valid, empty execution-data artifact.
pub fn empty_artifact() -> Vec<u8> {
    exec::encode(&ExecutionData::new()).expect("empty data always encodes")
}

#[derive(Debug, Clone)]
enum TransferStep {
    Deliver,
    Fail(String),
    Silent,
}

#[derive(Debug, Default)]
struct BridgeState {
    trigger_script: VecDeque<std::result::Result<(), String>>,
    transfer_script: VecDeque<TransferStep>,
    triggers: Vec<(Option<String>, String)>,
    transfers: Vec<(Option<String>, String)>,
}

/// A [`RemoteBridge`] whose outcomes are scripted per call.
///
/// Unscripted calls succeed. A successful transfer writes the configured
/// artifact bytes to `<local_dir>/<file name of remote_path>`; a scripted
/// failure writes nothing.
#[derive(Debug, Clone)]
pub struct ScriptedBridge {
    state: Arc<Mutex<BridgeState>>,
    artifact: Arc<Vec<u8>>,
}

impl Default for ScriptedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBridge {
    pub fn new() -> Self {
        Self::with_artifact(empty_artifact())
    }

    pub fn with_artifact(bytes: Vec<u8>) -> Self {
        Self {
            state: Arc::default(),
            artifact: Arc::new(bytes),
        }
    }

    /// Queue a failure for the next trigger call.
    pub fn fail_trigger(self, message: &str) -> Self {
        self.lock().trigger_script.push_back(Err(message.to_string()));
        self
    }

    /// Queue the next transfer outcome.
    pub fn script_transfer(self, outcome: std::result::Result<(), &str>) -> Self {
        let step = match outcome {
            Ok(()) => TransferStep::Deliver,
            Err(msg) => TransferStep::Fail(msg.to_string()),
        };
        self.lock().transfer_script.push_back(step);
        self
    }

    /// Transfer succeeds on the bridge side but produces no local file.
    pub fn script_silent_transfer(self) -> Self {
        self.lock().transfer_script.push_back(TransferStep::Silent);
        self
    }

    /// `(target, artifact_name)` of every trigger call.
    pub fn triggers(&self) -> Vec<(Option<String>, String)> {
        self.lock().triggers.clone()
    }

    /// `(target, remote_path)` of every transfer call.
    pub fn transfers(&self) -> Vec<(Option<String>, String)> {
        self.lock().transfers.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RemoteBridge for ScriptedBridge {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn trigger(&self, target: Option<&str>, artifact_name: &str) -> Result<()> {
        let outcome = {
            let mut state = self.lock();
            state
                .triggers
                .push((target.map(str::to_string), artifact_name.to_string()));
            state.trigger_script.pop_front().unwrap_or(Ok(()))
        };
        outcome.map_err(HarvestError::Trigger)
    }

    async fn transfer(
        &self,
        target: Option<&str>,
        remote_path: &str,
        local_dir: &Path,
    ) -> Result<()> {
        let outcome = {
            let mut state = self.lock();
            state
                .transfers
                .push((target.map(str::to_string), remote_path.to_string()));
            state
                .transfer_script
                .pop_front()
                .unwrap_or(TransferStep::Deliver)
        };

        match outcome {
            TransferStep::Deliver => {
                let name = remote_path.rsplit('/').next().unwrap_or(remote_path);
                tokio::fs::write(local_dir.join(name), self.artifact.as_slice())
                    .await
                    .map_err(|e| HarvestError::Transfer(e.to_string()))
            }
            TransferStep::Silent => Ok(()),
            TransferStep::Fail(msg) => Err(HarvestError::Transfer(msg)),
        }
    }
}

#[derive(Debug, Default)]
struct AnalyzerState {
    script: VecDeque<std::result::Result<Vec<CoverageRecord>, String>>,
    default_records: Vec<CoverageRecord>,
    decode_calls: usize,
    analyze_calls: usize,
}

/// A [`CoverageAnalyzer`] that decodes artifacts for real but returns
/// scripted records instead of matching class files.
///
/// Each `analyze` call pops the next scripted outcome; once the script is
/// exhausted the default records are returned.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAnalyzer {
    state: Arc<Mutex<AnalyzerState>>,
}

impl ScriptedAnalyzer {
    pub fn new(default_records: Vec<CoverageRecord>) -> Self {
        let analyzer = Self::default();
        analyzer.lock().default_records = default_records;
        analyzer
    }

    /// Queue the records returned by the next `analyze` call.
    pub fn then_records(self, records: Vec<CoverageRecord>) -> Self {
        self.lock().script.push_back(Ok(records));
        self
    }

    /// Make the next `analyze` call fail.
    pub fn then_fail(self, message: &str) -> Self {
        self.lock().script.push_back(Err(message.to_string()));
        self
    }

    pub fn decode_calls(&self) -> usize {
        self.lock().decode_calls
    }

    pub fn analyze_calls(&self) -> usize {
        self.lock().analyze_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AnalyzerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CoverageAnalyzer for ScriptedAnalyzer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decode(&self, artifact: &Path) -> Result<ExecutionData> {
        self.lock().decode_calls += 1;
        exec::decode_file(artifact)
    }

    async fn analyze(&self, _data: &ExecutionData, _class_inputs: &Path) -> Result<RecordStream> {
        let outcome = {
            let mut state = self.lock();
            state.analyze_calls += 1;
            let default = state.default_records.clone();
            state.script.pop_front().unwrap_or(Ok(default))
        };
        let records = outcome.map_err(HarvestError::Analyze)?;
        Ok(Box::pin(futures::stream::iter(records.into_iter().map(Ok::<_, HarvestError>))))
    }
}
