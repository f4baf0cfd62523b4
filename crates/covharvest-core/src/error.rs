//! Error types shared by every harvest component.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Errors raised while harvesting coverage.
///
/// Everything except [`HarvestError::Config`] and [`HarvestError::Output`]
/// is local to a single harvest cycle: the controller logs it and moves on
/// to the next attempt.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The bridge rejected or failed to dispatch the dump trigger.
    #[error("trigger failed: {0}")]
    Trigger(String),

    /// The artifact could not be retrieved from the device.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// The artifact is malformed or unreadable.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The analyzer could not match execution data against class inputs.
    #[error("analysis failed: {0}")]
    Analyze(String),

    /// No methods were observed, so no ratio can be computed.
    #[error("no samples: total method count is zero")]
    NoSamples,

    /// A required session parameter is missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The output destination could not be written or synced.
    #[error("failed to write result to {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl HarvestError {
    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Trigger(_) => ErrorKind::Trigger,
            Self::Transfer(_) => ErrorKind::Transfer,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Analyze(_) => ErrorKind::Analyze,
            Self::NoSamples => ErrorKind::NoSamples,
            Self::Config(_) => ErrorKind::Config,
            Self::Output { .. } => ErrorKind::Output,
        }
    }

    /// Whether this error must stop the session instead of just the cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Config | ErrorKind::Output)
    }
}

/// Fieldless classification of a [`HarvestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Trigger,
    Transfer,
    Decode,
    Analyze,
    NoSamples,
    Config,
    Output,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trigger => "trigger",
            Self::Transfer => "transfer",
            Self::Decode => "decode",
            Self::Analyze => "analyze",
            Self::NoSamples => "no_samples",
            Self::Config => "config",
            Self::Output => "output",
        };
        f.write_str(s)
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
