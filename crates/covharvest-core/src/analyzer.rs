//! Coverage analyzer: turns decoded execution data plus compiled classes
//! into per-class method counters.
//!
//! ```text
//! artifact --decode--> ExecutionData --analyze(class inputs)--> RecordStream
//!                                                                  |
//!                                                    CoverageRecord, ...
//! ```
//!
//! Decoding is done natively ([`crate::exec`]); structural matching against
//! class files is delegated to the JaCoCo command-line tool by
//! [`JacocoCliAnalyzer`].

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::command::run_command;
use crate::error::{HarvestError, Result};
use crate::exec::{self, ExecutionData};
use crate::record::CoverageRecord;

/// A finite, single-pass sequence of coverage records.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<CoverageRecord>> + Send>>;

/// Decoder and matcher for execution data.
#[async_trait]
pub trait CoverageAnalyzer: Send + Sync {
    /// Human-readable name for this analyzer (e.g. "jacoco-cli").
    fn name(&self) -> &str;

    /// Parse the artifact at `artifact`.
    ///
    /// The default reads the file and runs the native decoder.
    async fn decode(&self, artifact: &Path) -> Result<ExecutionData> {
        let bytes = tokio::fs::read(artifact).await.map_err(|e| {
            HarvestError::Decode(format!("failed to read {}: {e}", artifact.display()))
        })?;
        exec::decode(&bytes)
    }

    /// Match `data` against the compiled classes under `class_inputs` and
    /// yield one record per class.
    async fn analyze(&self, data: &ExecutionData, class_inputs: &Path) -> Result<RecordStream>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn CoverageAnalyzer) {}
};

/// Settings for [`JacocoCliAnalyzer`].
#[derive(Debug, Clone)]
pub struct JacocoCliConfig {
    /// The `java` executable.
    pub java: PathBuf,
    /// Path to `jacococli.jar`.
    pub cli_jar: PathBuf,
    /// Upper bound on one report run.
    pub timeout: Duration,
}

impl Default for JacocoCliConfig {
    fn default() -> Self {
        Self {
            java: PathBuf::from("java"),
            cli_jar: PathBuf::from("jacococli.jar"),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Analyzer that shells out to `jacococli.jar report --csv` and reads the
/// method counters from the CSV report.
#[derive(Debug, Clone, Default)]
pub struct JacocoCliAnalyzer {
    config: JacocoCliConfig,
}

impl JacocoCliAnalyzer {
    pub fn new(config: JacocoCliConfig) -> Self {
        Self { config }
    }

    fn report_args(&self, exec_file: &Path, class_inputs: &Path, csv: &Path) -> Vec<String> {
        let path = |p: &Path| p.to_string_lossy().into_owned();
        vec![
            "-jar".to_string(),
            path(&self.config.cli_jar),
            "report".to_string(),
            path(exec_file),
            "--classfiles".to_string(),
            path(class_inputs),
            "--csv".to_string(),
            path(csv),
            "--quiet".to_string(),
        ]
    }
}

#[async_trait]
impl CoverageAnalyzer for JacocoCliAnalyzer {
    fn name(&self) -> &str {
        "jacoco-cli"
    }

    async fn analyze(&self, data: &ExecutionData, class_inputs: &Path) -> Result<RecordStream> {
        if !class_inputs.exists() {
            return Err(HarvestError::Analyze(format!(
                "class inputs not found at {}",
                class_inputs.display()
            )));
        }

        let scratch = tempfile::TempDir::new()
            .map_err(|e| HarvestError::Analyze(format!("failed to create scratch dir: {e}")))?;
        let exec_file = scratch.path().join("merged.exec");
        let csv_file = scratch.path().join("report.csv");

        let bytes = exec::encode(data)
            .map_err(|e| HarvestError::Analyze(format!("failed to stage execution data: {e}")))?;
        tokio::fs::write(&exec_file, bytes)
            .await
            .map_err(|e| HarvestError::Analyze(format!("failed to stage execution data: {e}")))?;

        let args = self.report_args(&exec_file, class_inputs, &csv_file);
        let output = run_command(&self.config.java, &args, self.config.timeout)
            .await
            .map_err(|e| HarvestError::Analyze(format!("{e:#}")))?;
        if !output.success() {
            return Err(HarvestError::Analyze(format!(
                "jacoco report {}",
                output.failure_summary()
            )));
        }

        let csv = tokio::fs::read_to_string(&csv_file).await.map_err(|e| {
            HarvestError::Analyze(format!("jacoco report produced no CSV: {e}"))
        })?;

        Ok(csv_record_stream(csv))
    }
}

/// Column positions of the fields we read from a JaCoCo CSV report.
#[derive(Debug, Clone, Copy)]
struct CsvColumns {
    package: usize,
    class: usize,
    method_missed: usize,
    method_covered: usize,
}

impl CsvColumns {
    fn from_header(header: &str) -> Result<Self> {
        let names = split_csv_line(header);
        let find = |name: &str| {
            names.iter().position(|n| n == name).ok_or_else(|| {
                HarvestError::Analyze(format!("CSV report has no {name} column"))
            })
        };
        Ok(Self {
            package: find("PACKAGE")?,
            class: find("CLASS")?,
            method_missed: find("METHOD_MISSED")?,
            method_covered: find("METHOD_COVERED")?,
        })
    }

    fn parse_row(&self, line_no: usize, line: &str) -> Result<CoverageRecord> {
        let fields = split_csv_line(line);
        let field = |idx: usize, name: &str| {
            fields.get(idx).map(String::as_str).ok_or_else(|| {
                HarvestError::Analyze(format!("CSV line {line_no}: missing {name}"))
            })
        };
        let count = |idx: usize, name: &str| -> Result<u64> {
            field(idx, name)?.parse().map_err(|e| {
                HarvestError::Analyze(format!("CSV line {line_no}: bad {name}: {e}"))
            })
        };

        let package = field(self.package, "PACKAGE")?;
        let class = field(self.class, "CLASS")?;
        let class_name = if package.is_empty() {
            class.to_string()
        } else {
            format!("{package}.{class}")
        };

        Ok(CoverageRecord::new(
            class_name,
            count(self.method_covered, "METHOD_COVERED")?,
            count(self.method_missed, "METHOD_MISSED")?,
        ))
    }
}

/// Split one CSV record into trimmed fields.
///
/// Fields may be double-quoted; inside quotes a comma is literal and `""`
/// is an escaped quote. Records never span lines in JaCoCo reports.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Lazily parse a JaCoCo CSV report into records.
///
/// A report with a bad header yields a single error item.
pub fn csv_record_stream(csv: String) -> RecordStream {
    Box::pin(async_stream::stream! {
        let mut lines = csv.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
        let Some((_, header)) = lines.next() else {
            return;
        };
        let columns = match CsvColumns::from_header(header) {
            Ok(c) => c,
            Err(e) => {
                yield Err(e);
                return;
            }
        };
        for (idx, line) in lines {
            yield columns.parse_row(idx + 1, line);
        }
    })
}
