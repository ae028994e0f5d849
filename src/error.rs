//! # Error Handling
//!
//! This module defines the error taxonomy of the translation client and how each
//! error class maps to a stable process exit status.
//!
//! ## Error Classes:
//! - **Per-file**: malformed WAV headers, empty or unreadable input, connection
//!   failures, upload timeouts and output write failures. These end the upload of
//!   one file; whether the run continues is decided by the driver's failure policy.
//! - **Run-level**: configuration, validation and internal errors. These stop the
//!   whole run.
//!
//! ## Exit Statuses:
//! Scripts wrapping the CLI branch on the exit status, so the numbers in
//! [`ExitCode`] must never be renumbered.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// The stage of a connection in which a transport failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Opening the WebSocket (TCP, TLS or upgrade handshake)
    Connect,
    /// Transmitting an audio chunk
    Send,
    /// Reading inbound frames or waiting for them
    Receive,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionPhase::Connect => "connect",
            ConnectionPhase::Send => "send",
            ConnectionPhase::Receive => "receive",
        }
    }
}

/// Errors produced while translating audio files.
///
/// ## Usage Example:
/// ```rust
/// return Err(AppError::EmptyInput {
///     path: path.to_path_buf(),
///     reason: "file is empty".to_string(),
/// });
/// ```
#[derive(Debug)]
pub enum AppError {
    /// The input does not expose a usable RIFF/WAVE `fmt ` chunk
    MalformedHeader { path: PathBuf, reason: String },

    /// The input is empty, unreadable, or was only partially read
    EmptyInput { path: PathBuf, reason: String },

    /// The transport failed while connecting, sending or receiving
    Connection {
        path: PathBuf,
        phase: ConnectionPhase,
        message: String,
    },

    /// A send, or the whole upload, did not finish in time
    UploadTimeout { path: PathBuf, timeout: Duration },

    /// A translated artifact could not be written
    OutputWrite { path: PathBuf, source: io::Error },

    /// A command line option or input file failed validation
    Validation { subject: String, message: String },

    /// The settings file could not be created
    ConfigInit(String),

    /// The settings file or environment could not be read
    ConfigRead(String),

    /// Anything we did not anticipate
    Internal(String),
}

impl AppError {
    /// Shorthand for transport failures.
    pub fn connection(path: impl Into<PathBuf>, phase: ConnectionPhase, message: impl fmt::Display) -> Self {
        AppError::Connection {
            path: path.into(),
            phase,
            message: message.to_string(),
        }
    }

    /// Shorthand for validation failures.
    pub fn validation(subject: impl fmt::Display, message: impl Into<String>) -> Self {
        AppError::Validation {
            subject: subject.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error must stop the remaining files regardless of policy.
    ///
    /// Per-file failures are only fatal for the run when the driver is
    /// configured to stop on the first failure.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Internal(_)
                | AppError::Validation { .. }
                | AppError::ConfigInit(_)
                | AppError::ConfigRead(_)
        )
    }

    /// The process exit status for this error class.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::MalformedHeader { .. } | AppError::EmptyInput { .. } => ExitCode::FileReadError,
            AppError::Connection { phase: ConnectionPhase::Send, .. } => ExitCode::UploadError,
            AppError::Connection { .. } => ExitCode::ConnectionError,
            AppError::UploadTimeout { .. } => ExitCode::UploadTimeout,
            AppError::OutputWrite { .. } => ExitCode::FileWriteError,
            AppError::Validation { .. } => ExitCode::ValidationError,
            AppError::ConfigInit(_) => ExitCode::ConfigurationInitError,
            AppError::ConfigRead(_) => ExitCode::ConfigurationReadError,
            AppError::Internal(_) => ExitCode::InternalError,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::MalformedHeader { path, reason } => {
                write!(f, "Malformed WAV header in {}: {}", path.display(), reason)
            }
            AppError::EmptyInput { path, reason } => {
                write!(f, "Cannot upload {}: {}", path.display(), reason)
            }
            AppError::Connection { path, phase, message } => write!(
                f,
                "Connection error during {} for {}: {}",
                phase.as_str(),
                path.display(),
                message
            ),
            AppError::UploadTimeout { path, timeout } => write!(
                f,
                "Upload of {} did not complete within {} ms",
                path.display(),
                timeout.as_millis()
            ),
            AppError::OutputWrite { path, source } => {
                write!(f, "Could not write {}: {}", path.display(), source)
            }
            AppError::Validation { subject, message } => {
                write!(f, "Validation error: {} ({})", message, subject)
            }
            AppError::ConfigInit(msg) => write!(f, "Configuration init error: {}", msg),
            AppError::ConfigRead(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::OutputWrite { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// Anything that reaches us as an anyhow error was not classified at the
/// point of failure, so it becomes an internal error.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Configuration loading fails when the settings file has invalid syntax or
/// a value cannot be deserialized into its field.
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigRead(err.to_string())
    }
}

/// Stable process exit statuses.
///
/// ## Rust Concepts:
/// - **Explicit discriminants**: `= 4` pins the numeric value of each variant
/// - **Copy**: Small enums can be copied freely instead of borrowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Normal = 0,
    ConfigurationInitError = 1,
    ConfigurationReadError = 2,
    ValidationError = 3,
    ConnectionError = 4,
    UploadTimeout = 5,
    FileReadError = 6,
    FileWriteError = 7,
    InternalError = 9,
    UploadError = 10,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn description(self) -> &'static str {
        match self {
            ExitCode::Normal => "Normal exit.",
            ExitCode::ConfigurationInitError => "Configuration folder and file could not be initialized.",
            ExitCode::ConfigurationReadError => "Configuration file could not be read.",
            ExitCode::ValidationError => "Command line parameter validation failed.",
            ExitCode::ConnectionError => "Websocket connection error.",
            ExitCode::UploadTimeout => "Upload timeout exceeded.",
            ExitCode::FileReadError => "File could not be read.",
            ExitCode::FileWriteError => "File could not be written.",
            ExitCode::InternalError => "Internal error occurred.",
            ExitCode::UploadError => "File upload error.",
        }
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample_errors() -> Vec<AppError> {
        let path = PathBuf::from("/tmp/in.wav");
        vec![
            AppError::MalformedHeader { path: path.clone(), reason: "no fmt chunk".into() },
            AppError::connection(&path, ConnectionPhase::Connect, "refused"),
            AppError::connection(&path, ConnectionPhase::Send, "broken pipe"),
            AppError::UploadTimeout { path: path.clone(), timeout: Duration::from_secs(3) },
            AppError::OutputWrite {
                path: path.clone(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            },
            AppError::validation("--audio", "invalid option"),
            AppError::ConfigInit("no home".into()),
            AppError::ConfigRead("bad toml".into()),
            AppError::Internal("boom".into()),
        ]
    }

    #[test]
    fn test_failure_classes_have_distinct_exit_codes() {
        let codes: HashSet<i32> = sample_errors().iter().map(|e| e.exit_code().code()).collect();
        assert_eq!(codes.len(), sample_errors().len());
        assert!(!codes.contains(&ExitCode::Normal.code()));
    }

    #[test]
    fn test_header_and_empty_input_share_file_read_status() {
        let path = PathBuf::from("a.wav");
        let empty = AppError::EmptyInput { path: path.clone(), reason: "empty".into() };
        let header = AppError::MalformedHeader { path, reason: "bad".into() };
        assert_eq!(empty.exit_code(), ExitCode::FileReadError);
        assert_eq!(header.exit_code().code(), 6);
    }

    #[test]
    fn test_only_run_level_errors_are_run_fatal() {
        assert!(AppError::Internal("x".into()).is_run_fatal());
        assert!(!AppError::connection("a.wav", ConnectionPhase::Receive, "reset").is_run_fatal());
        assert!(!AppError::UploadTimeout { path: "a.wav".into(), timeout: Duration::ZERO }.is_run_fatal());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = AppError::UploadTimeout {
            path: PathBuf::from("/data/talk.wav"),
            timeout: Duration::from_millis(2500),
        };
        let text = err.to_string();
        assert!(text.contains("/data/talk.wav"));
        assert!(text.contains("2500 ms"));
    }
}
