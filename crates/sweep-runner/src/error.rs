use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::SweepPoint;

/// Failure of a single runner invocation.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("runner did not finish within {seconds}s and was killed")]
    Timeout { seconds: u64 },
    #[error("runner exited with status {status}: {stderr_tail}")]
    ExitStatus { status: String, stderr_tail: String },
    #[error("runner produced no output")]
    EmptyOutput,
    #[error("result line is not valid json ({line}): {source}")]
    MalformedJson {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("result schema mismatch: expected a json object, found {found}")]
    NotAnObject { found: &'static str },
    #[error("result schema mismatch: missing field {pointer}")]
    MissingField { pointer: String },
    #[error("i/o error while waiting for runner: {0}")]
    Io(#[from] io::Error),
}

impl InvocationError {
    /// The runner answered, but not in the shape the configured schema expects.
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(
            self,
            InvocationError::NotAnObject { .. } | InvocationError::MissingField { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("sweep point failed ({point}, repeat {}/{repeats}): {source}", .repeat + 1)]
    PointFailed {
        point: Box<SweepPoint>,
        repeat: usize,
        repeats: usize,
        #[source]
        source: InvocationError,
    },
    #[error("failed to write result record: {0}")]
    Sink(#[source] io::Error),
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl SweepError {
    pub fn code(&self) -> &'static str {
        match self {
            SweepError::Config(_) | SweepError::ConfigParse { .. } => "invalid_config",
            SweepError::Read { .. } => "read_failed",
            SweepError::PointFailed { source, .. } if source.is_schema_mismatch() => {
                "result_schema_mismatch"
            }
            SweepError::PointFailed { .. } => "sweep_point_failed",
            SweepError::Sink(_) => "sink_failed",
            SweepError::Json(_) => "json_encoding_failed",
        }
    }
}
