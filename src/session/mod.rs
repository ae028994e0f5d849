//! # Upload Session Module
//!
//! One session owns one WebSocket connection for the upload of one file and
//! the response that comes back for it.
//!
//! ## Key Components:
//! - **State machine**: `Idle → Connecting → Sending → AwaitingResponse → Closed`,
//!   plus `Errored` from any live state
//! - **Connection handler**: The event interface the transport reports through
//! - **Transport**: Connection setup with protocol limits
//! - **Upload**: Chunk pacing, frame demultiplexing and the completion signal
//!
//! ## Concurrency:
//! A reader task delivers frames and close/error events while a separate pump
//! task paces the chunks out, so pacing sleeps never delay frame delivery. The
//! caller waits on a single-shot completion signal.

pub mod handler; // Connection event callbacks
pub mod state; // Session lifecycle states
pub mod transport; // WebSocket connection setup
pub mod upload; // The upload session itself

#[cfg(test)]
pub(crate) mod test_support;

use crate::output::ResponseWriter;
use std::time::Duration;
use transport::TransportLimits;

/// How chunks are paced out to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    /// Wait between two audio chunks (never after the last one)
    pub chunk_delay: Duration,
    /// Size of the zero-filled end-of-speech frame; 0 disables it
    pub silence_bytes: usize,
    /// Longest a single send may take
    pub send_timeout: Duration,
}

/// Everything a session needs, resolved from configuration up front.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub limits: TransportLimits,
    pub pacing: Pacing,
    pub writer: ResponseWriter,
    /// Time allowed for the response once the upload is done
    pub response_timeout: Duration,
}

impl SessionSettings {
    /// Time the driver waits for a session with `chunk_count` chunks.
    ///
    /// ## Calculation:
    /// `chunk_count * (chunk_delay + send_timeout) + response_timeout`, so the
    /// bound grows with the length of the recording.
    pub fn completion_timeout(&self, chunk_count: usize) -> Duration {
        let per_chunk = self.pacing.chunk_delay.saturating_add(self.pacing.send_timeout);
        let chunks = u32::try_from(chunk_count).unwrap_or(u32::MAX);
        per_chunk.saturating_mul(chunks).saturating_add(self.response_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_settings;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn test_completion_timeout_grows_with_chunk_count() {
        let mut settings = test_settings(Path::new("/tmp"), false);
        settings.pacing.chunk_delay = Duration::from_millis(500);
        settings.pacing.send_timeout = Duration::from_millis(1_000);
        settings.response_timeout = Duration::from_secs(30);

        assert_eq!(settings.completion_timeout(1), Duration::from_millis(31_500));
        assert_eq!(settings.completion_timeout(8), Duration::from_millis(42_000));
    }
}
