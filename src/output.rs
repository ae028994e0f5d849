//! # Response Writer
//!
//! Turns inbound frames into output artifacts next to each other in the
//! output directory.
//!
//! ## Naming:
//! For an input `talk.wav`, postfix `.translation` and output dir `out/`:
//! - binary frame → `out/talk.translation.wav`
//! - text frame → `out/talk.translation.json` (unless text output is omitted)
//!
//! Payloads are opaque: audio bytes and text are written exactly as received.

use crate::error::{AppError, AppResult};
use crate::session::handler::InboundFrame;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Result of handing one frame to the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The artifact was written to this path
    Written(PathBuf),
    /// Text output is omitted; nothing was written
    Discarded,
}

/// Writes translated audio and transcripts for one run.
#[derive(Debug, Clone)]
pub struct ResponseWriter {
    output_dir: PathBuf,
    postfix: String,
    omit_text: bool,
}

impl ResponseWriter {
    pub fn new(output_dir: impl Into<PathBuf>, postfix: impl Into<String>, omit_text: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            postfix: postfix.into(),
            omit_text,
        }
    }

    /// `output_dir/<base><postfix>.<input extension>`
    pub fn audio_path(&self, input: &Path) -> PathBuf {
        let mut name = self.stem_with_postfix(input);
        if let Some(ext) = input.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        self.output_dir.join(name)
    }

    /// `output_dir/<base><postfix>.json`
    pub fn text_path(&self, input: &Path) -> PathBuf {
        let mut name = self.stem_with_postfix(input);
        name.push_str(".json");
        self.output_dir.join(name)
    }

    fn stem_with_postfix(&self, input: &Path) -> String {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}{}", stem, self.postfix)
    }

    /// Write the artifact for `frame`, which belongs to the upload of `input`.
    ///
    /// ## Error Handling:
    /// Any filesystem failure (missing directory, disk full, permissions)
    /// becomes `OutputWrite` carrying the artifact path.
    pub fn write(&self, frame: &InboundFrame, input: &Path) -> AppResult<WriteOutcome> {
        let (target, bytes) = match frame {
            InboundFrame::Binary(bytes) => (self.audio_path(input), bytes.as_slice()),
            InboundFrame::Text(_) if self.omit_text => {
                trace!("Text output omitted, discarding message for {}", input.display());
                return Ok(WriteOutcome::Discarded);
            }
            InboundFrame::Text(text) => (self.text_path(input), text.as_bytes()),
        };

        fs::write(&target, bytes).map_err(|source| AppError::OutputWrite {
            path: target.clone(),
            source,
        })?;
        debug!("Wrote {} bytes of {} response to {}", bytes.len(), frame.kind(), target.display());

        Ok(WriteOutcome::Written(target))
    }
}
