//! # Chunk Planning
//!
//! Computes the byte ranges a file is uploaded in. Each range approximates a
//! quarter second of playback so the service never receives audio faster than
//! real time (the pacing delay between sends lives in the session).
//!
//! ## Algorithm:
//! 1. `duration = file_len / byte_rate`
//! 2. `count = ceil(duration / 0.25)`, at least 1
//! 3. `chunk_size = ceil(file_len / count)`
//! 4. `delta = chunk_size * count - file_len`
//! 5. `count` ranges of `chunk_size` bytes from offset 0, the last one shortened
//!    by `delta`
//!
//! Ranges never cross the end of the file. For pathological byte rates (under
//! four bytes per second) more chunks are planned than the file has bytes; the
//! surplus ranges are then empty rather than negative.

use std::fmt;
use std::ops::Range;

/// Target playback duration of one chunk, in seconds.
pub const CHUNK_SECONDS: f64 = 0.25;

/// Why a plan could not be computed.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanError {
    /// Zero-length input; the chunk count would divide by zero
    EmptyInput,
    /// The header yields a byte rate that is zero, negative or not finite
    InvalidByteRate(f64),
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::EmptyInput => write!(f, "input has no bytes to upload"),
            PlanError::InvalidByteRate(rate) => write!(f, "byte rate {} is not usable for pacing", rate),
        }
    }
}

/// One contiguous byte range of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub offset: usize,
    pub len: usize,
}

impl Chunk {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Ordered, gap-free, non-overlapping ranges covering a file exactly.
///
/// Ranges are derived on demand from the chunk size, so a header with an
/// absurd byte rate costs nothing until the chunks are walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    count: usize,
    chunk_size: usize,
    delta: usize,
    file_len: usize,
}

impl ChunkPlan {
    /// Plan the chunks for `file_len` bytes played back at `byte_rate` bytes per second.
    ///
    /// ## Example:
    /// 64,000 bytes at 32,000 B/s (16 kHz, mono, 16-bit) is 2 seconds, which
    /// gives 8 chunks of 8,000 bytes and no remainder.
    pub fn new(file_len: usize, byte_rate: f64) -> Result<Self, PlanError> {
        if file_len == 0 {
            return Err(PlanError::EmptyInput);
        }
        if !byte_rate.is_finite() || byte_rate <= 0.0 {
            return Err(PlanError::InvalidByteRate(byte_rate));
        }

        let duration_seconds = file_len as f64 / byte_rate;
        let count = ((duration_seconds / CHUNK_SECONDS).ceil() as usize).max(1);
        let chunk_size = file_len.div_ceil(count);
        let delta = chunk_size * count - file_len;

        Ok(Self {
            count,
            chunk_size,
            delta,
            file_len,
        })
    }

    /// The chunk at `index`, or `None` past the end of the plan.
    pub fn chunk(&self, index: usize) -> Option<Chunk> {
        if index >= self.count {
            return None;
        }
        // Clamping only matters when count > file_len; otherwise this is
        // chunk_size for every range but the last, which loses `delta`
        let offset = index.saturating_mul(self.chunk_size).min(self.file_len);
        let len = self.chunk_size.min(self.file_len - offset);
        Some(Chunk { index, offset, len })
    }

    /// All chunks in upload order.
    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        (0..self.count).filter_map(move |index| self.chunk(index))
    }

    /// Number of chunks (always at least 1).
    pub fn len(&self) -> usize {
        self.count
    }

    /// Nominal size of every chunk but the last.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Bytes removed from the final chunk so the plan sums to the file length.
    pub fn delta(&self) -> usize {
        self.delta
    }

    pub fn file_len(&self) -> usize {
        self.file_len
    }

    pub fn is_last(&self, chunk: &Chunk) -> bool {
        chunk.index + 1 == self.count
    }
}
