//! # Session State Machine
//!
//! ## Session Lifecycle:
//! 1. **Idle**: Created, nothing opened yet
//! 2. **Connecting**: WebSocket handshake in progress
//! 3. **Sending**: Chunks are being paced out to the service
//! 4. **AwaitingResponse**: Everything sent, reacting to inbound frames only
//! 5. **Closed**: Close handshake finished
//! 6. **Errored**: Any I/O failure; reachable from every non-terminal state

/// Current state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Sending,
    AwaitingResponse,
    Closed,
    Errored,
}

impl SessionState {
    /// Convert state to string for log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Sending => "sending",
            SessionState::AwaitingResponse => "awaiting_response",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        }
    }

    /// Closed and Errored end the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }

    /// Whether inbound frames are meaningful in this state.
    ///
    /// The service may answer before the last chunk has gone out, so frames are
    /// accepted while sending as well. Closing still waits for the upload.
    pub fn accepts_frames(&self) -> bool {
        matches!(self, SessionState::Sending | SessionState::AwaitingResponse)
    }

    /// Check whether moving to `next` is a legal transition.
    ///
    /// ## Transitions:
    /// - Idle → Connecting
    /// - Connecting → Sending
    /// - Sending → AwaitingResponse
    /// - AwaitingResponse → Closed
    /// - any non-terminal → Errored
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Idle, Connecting) => true,
            (Connecting, Sending) => true,
            (Sending, AwaitingResponse) => true,
            (AwaitingResponse, Closed) => true,
            (current, Errored) => !current.is_terminal(),
            _ => false,
        }
    }
}
