//! `covharvest run` command: harvest coverage from a device until the time
//! budget runs out.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;

use covharvest_core::analyzer::{CoverageAnalyzer, JacocoCliAnalyzer};
use covharvest_core::bridge::{AdbBridge, RemoteBridge};
use covharvest_core::config::SessionConfig;
use covharvest_core::controller::{HarvestLoop, HarvestReport};

use crate::config::{ToolConfig, ToolOverrides};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Compiled class files (directory or jar) to match coverage against
    #[arg(long = "class-files", alias = "classFile", value_name = "PATH")]
    pub class_files: PathBuf,
    /// Directory on the device where the app writes its coverage artifact
    #[arg(long = "remote-dir", alias = "ecFilePath", value_name = "DIR")]
    pub remote_dir: String,
    /// File name of the coverage artifact
    #[arg(long = "artifact", alias = "ecFileName", value_name = "NAME")]
    pub artifact: String,
    /// Device serial (omit to use the only connected device)
    #[arg(short = 's', long = "serial", alias = "udid")]
    pub serial: Option<String>,
    /// Local directory the artifact is pulled into
    #[arg(long = "staging-dir", alias = "pullPath", default_value = ".")]
    pub staging_dir: PathBuf,
    /// File the coverage percentages are appended to
    #[arg(short = 'o', long, default_value = "coverage.txt")]
    pub output: PathBuf,
    /// Run-time budget in seconds; zero or negative runs a single cycle
    #[arg(short = 't', long = "time", default_value_t = 0, allow_negative_numbers = true)]
    pub time: i64,
    /// Wait between trigger and transfer, in milliseconds
    #[arg(long)]
    pub settle_ms: Option<u64>,
    /// Wait between cycles, in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,
    /// Also write every attempt, failures included, as JSON lines here
    #[arg(long, value_name = "PATH")]
    pub attempt_log: Option<PathBuf>,
    /// The `adb` executable (overrides COVHARVEST_ADB)
    #[arg(long)]
    pub adb: Option<PathBuf>,
    /// The `java` executable (overrides COVHARVEST_JAVA)
    #[arg(long)]
    pub java: Option<PathBuf>,
    /// Path to jacococli.jar (overrides COVHARVEST_JACOCO_CLI)
    #[arg(long = "jacoco-cli")]
    pub jacoco_cli: Option<PathBuf>,
}

impl RunArgs {
    fn overrides(&self) -> ToolOverrides {
        ToolOverrides {
            adb: self.adb.clone(),
            java: self.java.clone(),
            jacoco_cli: self.jacoco_cli.clone(),
            settle_ms: self.settle_ms,
            delay_ms: self.delay_ms,
        }
    }
}

/// Build the session from command-line arguments and resolved tool settings.
pub fn build_session(args: &RunArgs, tools: &ToolConfig) -> Result<SessionConfig> {
    let session = SessionConfig::builder(&args.class_files, &args.remote_dir, &args.artifact)
        .target(args.serial.as_deref())
        .staging_dir(&args.staging_dir)
        .output(&args.output)
        .budget_secs(args.time)
        .settle_interval(tools.settle_interval)
        .attempt_delay(tools.attempt_delay)
        .build()?;
    Ok(session)
}

/// Run the harvest loop with the given collaborators.
pub async fn harvest(
    session: SessionConfig,
    bridge: Box<dyn RemoteBridge>,
    analyzer: Box<dyn CoverageAnalyzer>,
    attempt_log: Option<PathBuf>,
    cancel: CancellationToken,
) -> Result<HarvestReport> {
    let mut harvest = HarvestLoop::new(session, bridge, analyzer);
    if let Some(path) = attempt_log {
        harvest = harvest.with_attempt_log(path);
    }
    Ok(harvest.run(cancel).await?)
}

/// Run the run command.
pub async fn run_harvest(args: RunArgs, cancel: CancellationToken) -> Result<()> {
    let tools = ToolConfig::resolve(&args.overrides())?;
    let session = build_session(&args, &tools)?;
    let output = session.output().to_path_buf();

    let bridge = Box::new(AdbBridge::new(tools.adb));
    let analyzer = Box::new(JacocoCliAnalyzer::new(tools.jacoco));
    let report = harvest(session, bridge, analyzer, args.attempt_log, cancel).await?;

    print_summary(&report, &output);
    Ok(())
}

fn print_summary(report: &HarvestReport, output: &std::path::Path) {
    println!(
        "Cycles: {} ({} succeeded, {} failed)",
        report.attempts.len(),
        report.successes(),
        report.failures()
    );
    match report.last_ratio() {
        Some(ratio) => println!("Last coverage: {:.5}%", ratio * 100.0),
        None => println!("Last coverage: n/a"),
    }
    println!("Results appended to {}", output.display());
    if report.interrupted {
        println!("Stopped early on interrupt.");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use covharvest_core::error::HarvestError;
    use covharvest_core::record::CoverageRecord;
    use covharvest_test_utils::{ScriptedAnalyzer, ScriptedBridge};

    use super::*;
    use crate::config::ConfigFile;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> RunArgs {
        let argv = std::iter::once("covharvest").chain(args.iter().copied());
        Harness::try_parse_from(argv).expect("valid args").run
    }

    fn tools() -> ToolConfig {
        ToolConfig {
            adb: Default::default(),
            jacoco: Default::default(),
            settle_interval: Duration::ZERO,
            attempt_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn legacy_option_names_are_accepted() {
        let args = parse(&[
            "--classFile",
            "app/classes",
            "--ecFilePath",
            "/sdcard",
            "--ecFileName",
            "coverage.ec",
            "--udid",
            "emulator-5554",
            "--pullPath",
            "/tmp/pull",
        ]);
        assert_eq!(args.class_files, PathBuf::from("app/classes"));
        assert_eq!(args.remote_dir, "/sdcard");
        assert_eq!(args.artifact, "coverage.ec");
        assert_eq!(args.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(args.staging_dir, PathBuf::from("/tmp/pull"));
    }

    #[test]
    fn defaults_apply_when_optional_flags_are_omitted() {
        let args = parse(&[
            "--class-files",
            "classes",
            "--remote-dir",
            "/sdcard",
            "--artifact",
            "coverage.ec",
        ]);
        assert_eq!(args.time, 0);
        assert_eq!(args.staging_dir, PathBuf::from("."));
        assert_eq!(args.output, PathBuf::from("coverage.txt"));
        assert!(args.serial.is_none());
    }

    #[test]
    fn negative_time_parses_and_means_single_cycle() {
        let args = parse(&[
            "--class-files",
            "classes",
            "--remote-dir",
            "/sdcard",
            "--artifact",
            "coverage.ec",
            "-t",
            "-5",
        ]);
        let session = build_session(&args, &tools()).unwrap();
        assert!(session.budget().is_none());
    }

    #[test]
    fn missing_required_option_is_rejected() {
        let argv = ["covharvest", "--remote-dir", "/sdcard", "--artifact", "coverage.ec"];
        assert!(Harness::try_parse_from(argv).is_err());
    }

    #[test]
    fn empty_artifact_name_is_config_error() {
        let args = parse(&[
            "--class-files",
            "classes",
            "--remote-dir",
            "/sdcard",
            "--artifact",
            "",
        ]);
        let err = build_session(&args, &tools()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarvestError>(),
            Some(HarvestError::Config(_))
        ));
    }

    #[test]
    fn cli_timing_flags_reach_the_session() {
        let args = parse(&[
            "--class-files",
            "classes",
            "--remote-dir",
            "/sdcard",
            "--artifact",
            "coverage.ec",
            "--settle-ms",
            "25",
        ]);
        let tools = ToolConfig::resolve_with(&args.overrides(), ConfigFile::default());
        let session = build_session(&args, &tools).unwrap();
        assert_eq!(session.settle_interval(), Duration::from_millis(25));
        assert_eq!(session.attempt_delay(), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn harvest_appends_result_line() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("coverage.txt");
        let args = parse(&[
            "--class-files",
            "classes",
            "--remote-dir",
            "/sdcard",
            "--artifact",
            "coverage.ec",
            "--staging-dir",
            tmp.path().to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ]);
        let session = build_session(&args, &tools()).unwrap();
        let analyzer = ScriptedAnalyzer::new(vec![CoverageRecord::new("a.B", 1, 1)]);

        let report = harvest(
            session,
            Box::new(ScriptedBridge::new()),
            Box::new(analyzer),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.successes(), 1);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "50.00000%\n");
    }
}
