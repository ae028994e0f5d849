//! # Sequential Driver
//!
//! Uploads the input files one after another, one connection per file, never
//! two at once.
//!
//! ## Per File:
//! 1. Read the file and plan its chunks (failures here never connect)
//! 2. Open an [`UploadSession`]
//! 3. Wait for it with a timeout proportional to the file's length
//! 4. Close the session whatever happened
//! 5. Record the outcome and decide whether to go on
//!
//! ## Failure Policy:
//! By default the run stops at the first failed file.
//! `--continue-on-error` keeps going past per-file failures; run-level
//! errors (internal, validation, configuration) always stop the run.

use crate::audio::file::AudioFile;
use crate::endpoint;
use crate::error::{AppError, AppResult, ExitCode};
use crate::session::upload::{Completion, UploadSession};
use crate::session::SessionSettings;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

/// What to do after a file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    StopOnFirstFailure,
    ContinueOnError,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::StopOnFirstFailure => "stop_on_first_failure",
            FailurePolicy::ContinueOnError => "continue_on_error",
        }
    }
}

/// Outcome of one file.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Artifacts written, or why the file failed
    pub result: Result<Vec<PathBuf>, AppError>,
}

impl FileReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcome of a whole run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub files: Vec<FileReport>,
    /// Files never attempted because the run stopped early
    pub skipped: usize,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    /// Exit status of the first failure, or `Normal`.
    pub fn exit_code(&self) -> ExitCode {
        self.files
            .iter()
            .find_map(|f| f.result.as_ref().err())
            .map_or(ExitCode::Normal, AppError::exit_code)
    }

    pub fn log_summary(&self) {
        info!(
            "Run finished: {} succeeded, {} failed, {} skipped",
            self.succeeded(),
            self.failed(),
            self.skipped
        );
        for report in &self.files {
            match &report.result {
                Ok(artifacts) => info!(
                    "  [{}] {} -> {} artifact(s) in {:.1}s",
                    report.started_at.format("%H:%M:%S"),
                    report.path.display(),
                    artifacts.len(),
                    report.elapsed.as_secs_f64()
                ),
                Err(e) => error!(
                    "  [{}] {} failed (exit {}): {}",
                    report.started_at.format("%H:%M:%S"),
                    report.path.display(),
                    e.exit_code().code(),
                    e
                ),
            }
        }
    }
}

/// Runs uploads one file at a time against a single endpoint.
pub struct SequentialDriver {
    settings: SessionSettings,
    endpoint: Url,
    policy: FailurePolicy,
}

impl SequentialDriver {
    pub fn new(settings: SessionSettings, endpoint: Url, policy: FailurePolicy) -> Self {
        Self {
            settings,
            endpoint,
            policy,
        }
    }

    /// Process `files` in order and report on each.
    pub async fn run(&self, files: &[PathBuf]) -> RunReport {
        info!(
            "Translating {} file(s) via {} (policy: {})",
            files.len(),
            endpoint::redact(&self.endpoint),
            self.policy.as_str()
        );

        let mut report = RunReport::default();
        for (position, path) in files.iter().enumerate() {
            let started_at = Utc::now();
            let clock = Instant::now();
            let result = self.translate(path).await;
            let elapsed = clock.elapsed();

            let stop = match &result {
                Ok(artifacts) => {
                    info!("Translated {} into {} artifact(s)", path.display(), artifacts.len());
                    false
                }
                Err(e) => {
                    error!("Translation of {} failed: {}", path.display(), e);
                    e.is_run_fatal() || self.policy == FailurePolicy::StopOnFirstFailure
                }
            };

            report.files.push(FileReport {
                path: path.clone(),
                started_at,
                elapsed,
                result,
            });

            if stop {
                report.skipped = files.len() - position - 1;
                if report.skipped > 0 {
                    warn!("Stopping run, {} file(s) not attempted", report.skipped);
                }
                break;
            }
        }

        report
    }

    /// Upload one file and collect its artifacts.
    async fn translate(&self, path: &Path) -> AppResult<Vec<PathBuf>> {
        let file = Arc::new(AudioFile::open(path)?);
        let mut session = UploadSession::open(file.clone(), &self.settings, self.endpoint.as_str()).await?;
        let limit = self.settings.completion_timeout(session.plan().len());
        debug!(
            "Session {} waiting up to {} ms for {}",
            session.id(),
            limit.as_millis(),
            file.path().display()
        );

        let completion = session.await_completion(limit).await;
        debug!(
            "Session {} ended wait in state {} after sending {} of {} bytes",
            session.id(),
            session.state().as_str(),
            session.bytes_sent(),
            session.plan().file_len()
        );

        let outcome = match completion {
            Completion::Completed => {
                let artifacts = session.artifacts();
                if artifacts.is_empty() {
                    warn!("Service closed the session for {} without a response", file.path().display());
                }
                Ok(artifacts)
            }
            Completion::TimedOut => Err(AppError::UploadTimeout {
                path: file.path().to_path_buf(),
                timeout: limit,
            }),
            Completion::Errored(e) => Err(e),
        };

        session.close().await;
        outcome
    }
}
