//! # Input Audio File
//!
//! Loads one WAV file fully into memory before any connection is opened, so
//! that header, length and read errors are reported without touching the
//! network.

use crate::audio::chunk::{ChunkPlan, PlanError};
use crate::audio::wav::{read_wav_header, WavHeader};
use crate::error::{AppError, AppResult};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An immutable, fully read input file.
#[derive(Debug)]
pub struct AudioFile {
    /// Absolute path of the input
    path: PathBuf,
    header: WavHeader,
    data: Vec<u8>,
}

impl AudioFile {
    /// Open and read an input file.
    ///
    /// ## Failure Modes:
    /// - **EmptyInput**: the file cannot be read, has zero length, or fewer bytes
    ///   were read than its metadata declares
    /// - **MalformedHeader**: the RIFF/WAVE header is unusable
    pub fn open(path: &Path) -> AppResult<Self> {
        let path = fs::canonicalize(path).map_err(|e| AppError::EmptyInput {
            path: path.to_path_buf(),
            reason: format!("cannot resolve path: {}", e),
        })?;

        let declared_len = fs::metadata(&path)
            .map_err(|e| AppError::EmptyInput {
                path: path.clone(),
                reason: format!("cannot read metadata: {}", e),
            })?
            .len() as usize;

        if declared_len == 0 {
            return Err(AppError::EmptyInput {
                path,
                reason: "file is empty".to_string(),
            });
        }

        let data = fs::read(&path).map_err(|e| AppError::EmptyInput {
            path: path.clone(),
            reason: format!("cannot read file: {}", e),
        })?;
        debug!("{} bytes read to buffer of {} declared bytes", data.len(), declared_len);

        if data.len() != declared_len {
            return Err(AppError::EmptyInput {
                path,
                reason: format!(
                    "read {} bytes but the file declares {} bytes",
                    data.len(),
                    declared_len
                ),
            });
        }

        Self::from_bytes(path, data)
    }

    /// Build an audio file from bytes that are already in memory.
    pub fn from_bytes(path: PathBuf, data: Vec<u8>) -> AppResult<Self> {
        if data.is_empty() {
            return Err(AppError::EmptyInput {
                path,
                reason: "file is empty".to_string(),
            });
        }

        let header = read_wav_header(Cursor::new(data.as_slice())).map_err(|reason| AppError::MalformedHeader {
            path: path.clone(),
            reason,
        })?;
        debug!(
            "{}: format {}, {} Hz, {} channel(s), {} bits per sample",
            path.display(),
            header.audio_format,
            header.sample_rate,
            header.channels,
            header.bits_per_sample
        );

        Ok(Self { path, header, data })
    }

    /// Split the file into quarter-second chunks.
    pub fn chunk_plan(&self) -> AppResult<ChunkPlan> {
        ChunkPlan::new(self.data.len(), self.header.byte_rate()).map_err(|err| match err {
            PlanError::EmptyInput => AppError::EmptyInput {
                path: self.path.clone(),
                reason: err.to_string(),
            },
            PlanError::InvalidByteRate(_) => AppError::MalformedHeader {
                path: self.path.clone(),
                reason: err.to_string(),
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Playback duration implied by the header.
    pub fn duration_seconds(&self) -> f64 {
        self.data.len() as f64 / self.header.byte_rate()
    }
}
