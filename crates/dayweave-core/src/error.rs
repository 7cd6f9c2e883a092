//! Core error types for dayweave-core.
//!
//! The hierarchy follows the planning run: data fetches, compilation,
//! generation, parsing, validation and calendar write-back each get their
//! own enum, and [`CoreError`] wraps them for callers that only need to
//! propagate.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for dayweave-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A collaborator could not be read
    #[error("Data fetch error: {0}")]
    DataFetch(#[from] DataFetchError),

    /// The constraint payload could not be built
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// The generative scheduling service failed or timed out
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Nothing usable could be parsed from the generator response
    #[error("Parse failure: {0}")]
    Parse(#[from] ParseFailure),

    /// A single entry failed field checks
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Calendar write-back failed (partial writes were rolled back)
    #[error("Write-back error: {0}")]
    WriteBack(#[from] WriteBackError),

    /// The run was cancelled between stages
    #[error("Planning run cancelled before {stage}")]
    Cancelled { stage: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

impl CoreError {
    /// Stable, machine-readable reason for a failed run.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "config_error",
            CoreError::DataFetch(_) => "data_fetch_error",
            CoreError::Compile(_) => "compile_error",
            CoreError::Generation(GenerationError::Timeout { .. }) => "generation_timeout",
            CoreError::Generation(_) => "generation_error",
            CoreError::Parse(_) => "parse_failure",
            CoreError::Validation(_) => "validation_error",
            CoreError::WriteBack(_) => "write_back_failed",
            CoreError::Cancelled { .. } => "cancelled",
            CoreError::Io(_) => "io_error",
            CoreError::Json(_) => "json_error",
            CoreError::Custom(_) => "error",
        }
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Home/config directory could not be prepared
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Which collaborator a fetch error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Calendar,
    Tasks,
    Habits,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataSource::Calendar => "calendar",
            DataSource::Tasks => "tasks",
            DataSource::Habits => "habits",
        };
        f.write_str(name)
    }
}

/// A collaborator is unreachable or returned malformed data.
#[derive(Error, Debug)]
#[error("{source_kind} provider failed: {message}")]
pub struct DataFetchError {
    pub source_kind: DataSource,
    pub message: String,
}

impl DataFetchError {
    pub fn new(source_kind: DataSource, message: impl Into<String>) -> Self {
        Self {
            source_kind,
            message: message.into(),
        }
    }
}

/// Invariant violations found while building the constraint payload.
#[derive(Error, Debug, PartialEq)]
pub enum CompileError {
    /// A phase whose end is not after its start (and is not the wrapping phase)
    #[error("Phase '{phase}' is inverted: {start} -> {end}")]
    InvertedPhase {
        phase: String,
        start: String,
        end: String,
    },

    /// The planning window is empty
    #[error("Planning window is empty: {start} -> {end}")]
    InvalidWindow { start: String, end: String },

    /// Phases leave a gap or overlap
    #[error("Phases do not tile the day: '{before}' ends at {end} but '{after}' starts at {start}")]
    PhaseNotTiled {
        before: String,
        after: String,
        end: String,
        start: String,
    },

    /// No phases configured
    #[error("No phases configured")]
    NoPhases,

    /// Clock value that cannot be parsed
    #[error("Invalid clock time '{value}' for {field}")]
    InvalidClock { field: String, value: String },

    /// A local time that does not exist on the target date
    #[error("Local time {time} does not exist on {date} in {timezone}")]
    NonexistentLocalTime {
        date: String,
        time: String,
        timezone: String,
    },

    /// Two anchors overlap
    #[error("Anchors '{first}' and '{second}' overlap")]
    OverlappingAnchors { first: String, second: String },

    /// Anchor definition is unusable
    #[error("Anchor '{name}' is invalid: {message}")]
    InvalidAnchor { name: String, message: String },

    /// The sun does not rise or set on the target date at the configured location
    #[error("No sunrise/sunset on {date} at latitude {latitude}")]
    NoSolarDay { date: String, latitude: f64 },
}

/// The generative service failed.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// No generator configured for this run
    #[error("No schedule generator configured")]
    Unavailable,

    /// The call exceeded its bound
    #[error("Schedule generator timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Transport-level failure
    #[error("Request to schedule generator failed: {0}")]
    Request(String),

    /// Non-success HTTP status
    #[error("Schedule generator returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The service answered but with nothing usable
    #[error("Schedule generator returned an empty response")]
    Empty,

    /// Missing credentials for the configured endpoint
    #[error("API key environment variable '{0}' is not set")]
    MissingApiKey(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Request(err.to_string())
    }
}

/// Nothing parsable came back from the generator.
#[derive(Error, Debug)]
#[error("No valid schedule entries in response ({rejected} rejected): {reason}")]
pub struct ParseFailure {
    pub rejected: usize,
    pub reason: String,
}

/// A single schedule entry failed its field checks.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Invalid time range
    #[error("Invalid time range: end_time ({end}) must be after start_time ({start})")]
    InvalidTimeRange { start: String, end: String },

    /// Kind tag not recognised
    #[error("Unknown entry kind '{0}'")]
    UnknownKind(String),

    /// Time that cannot be parsed
    #[error("Invalid value for '{field}': '{value}' is not a valid time")]
    InvalidTime { field: String, value: String },

    /// Entry does not lie within the planning window
    #[error("Entry {start}..{end} falls outside the planning window {window_start}..{window_end}")]
    OutsideWindow {
        start: String,
        end: String,
        window_start: String,
        window_end: String,
    },

    /// Required field absent or empty
    #[error("Missing required field '{0}'")]
    MissingField(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// The calendar provider rejected insertion.
#[derive(Error, Debug)]
#[error("Calendar write-back failed after {inserted} insertions ({rolled_back} rolled back): {message}")]
pub struct WriteBackError {
    pub inserted: usize,
    pub rolled_back: usize,
    pub message: String,
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CoreError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        CoreError::Custom(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let timeout = CoreError::from(GenerationError::Timeout { timeout_secs: 5 });
        assert_eq!(timeout.code(), "generation_timeout");

        let write = CoreError::from(WriteBackError {
            inserted: 2,
            rolled_back: 2,
            message: "quota".into(),
        });
        assert_eq!(write.code(), "write_back_failed");
        assert!(write.to_string().contains("2 rolled back"));
    }

    #[test]
    fn data_fetch_error_names_its_source() {
        let err = DataFetchError::new(DataSource::Habits, "sheet unreachable");
        assert_eq!(err.to_string(), "habits provider failed: sheet unreachable");
    }
}
