//! # Connection Events
//!
//! The transport reports what happens on a connection through the
//! [`ConnectionHandler`] trait. The upload session implements it; the reader
//! task that owns the inbound half of the socket calls it.

use crate::error::AppError;

/// A message received from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Translated audio, written verbatim
    Binary(Vec<u8>),
    /// Transcript or metadata document, written verbatim
    Text(String),
}

impl InboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Binary(_) => "binary",
            InboundFrame::Text(_) => "text",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            InboundFrame::Binary(bytes) => bytes.len(),
            InboundFrame::Text(text) => text.len(),
        }
    }
}

/// What the transport should do after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Keep reading
    Continue,
    /// Start a normal close handshake, then keep reading until it completes
    Close,
    /// The session failed; stop reading
    Abort,
}

/// Callbacks for the lifecycle of one connection.
///
/// ## Threading:
/// All methods are invoked from transport tasks, never from the caller
/// awaiting completion, so implementations must be `Send + Sync` and must not
/// block for long.
pub trait ConnectionHandler: Send + Sync {
    /// The WebSocket handshake completed.
    fn on_open(&self);

    /// A binary or text message arrived.
    fn on_frame(&self, frame: InboundFrame) -> FrameDisposition;

    /// The close handshake completed (or the peer closed cleanly).
    fn on_close(&self, code: Option<u16>, reason: &str);

    /// The connection failed.
    fn on_error(&self, error: AppError);
}
