//! Coverage harvesting core.
//!
//! Repeatedly asks an instrumented app on a device to dump its coverage,
//! pulls the artifact, decodes it, folds per-class method counters into a
//! ratio, and appends each ratio to a result file until a time budget runs
//! out.
//!
//! ```text
//! HarvestLoop
//!     |  (repeat until deadline)
//!     v
//! HarvestCycle --trigger/transfer--> dyn RemoteBridge      (AdbBridge)
//!     |        --decode/analyze----> dyn CoverageAnalyzer  (JacocoCliAnalyzer)
//!     |                                   |
//!     |                              RecordStream
//!     v                                   v
//! CoverageAggregator <---- accept(CoverageRecord) ...
//! ```

pub mod aggregate;
pub mod analyzer;
pub mod bridge;
pub mod command;
pub mod config;
pub mod controller;
pub mod cycle;
pub mod error;
pub mod exec;
pub mod record;

pub use aggregate::CoverageAggregator;
pub use analyzer::{CoverageAnalyzer, JacocoCliAnalyzer, JacocoCliConfig, RecordStream};
pub use bridge::{AdbBridge, AdbConfig, RemoteBridge};
pub use config::{SessionConfig, SessionConfigBuilder};
pub use controller::{HarvestAttempt, HarvestLoop, HarvestReport, ResultLog};
pub use cycle::{CycleOutcome, CycleSummary, HarvestCycle};
pub use error::{ErrorKind, HarvestError};
pub use exec::ExecutionData;
pub use record::{CoverageRatio, CoverageRecord};
