//! # Upload Session
//!
//! Streams one WAV file to the translation service and collects what comes
//! back.
//!
//! ## Flow:
//! 1. Plan the chunks (before any connection, so bad input never connects)
//! 2. Connect; the handshake moves the session to `Sending`
//! 3. The pump task sends each chunk with a pause in between, then a block
//!    of silence that tells the service the speech is over
//! 4. The reader task hands frames to [`SessionCore::on_frame`], which writes
//!    them out and asks for a normal close once the response is in. A response
//!    that arrives mid-upload only marks the close as pending; the pump starts
//!    it after the silence frame
//! 5. The close handshake (or any failure) fires the completion signal
//!
//! ## Rust Concepts:
//! - `Arc<SessionCore>` shared between the two tasks and the caller
//! - A `std::sync::Mutex` around the small bookkeeping struct; it is never
//!   held across an `.await`
//! - A `tokio::sync::Mutex` around the socket's write half, which both tasks
//!   send on
//! - `oneshot` for the completion signal; whoever reaches a terminal state
//!   first takes the sender

use crate::audio::chunk::{Chunk, ChunkPlan};
use crate::audio::file::AudioFile;
use crate::error::{AppError, AppResult, ConnectionPhase};
use crate::output::{ResponseWriter, WriteOutcome};
use crate::session::handler::{ConnectionHandler, FrameDisposition, InboundFrame};
use crate::session::state::SessionState;
use crate::session::transport::{self, TransportLimits, WsStream};
use crate::session::{Pacing, SessionSettings};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

type WsSink = SplitSink<WsStream, Message>;

/// Time given to our own close frame when the caller releases a session.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// How waiting for a session ended.
#[derive(Debug)]
pub enum Completion {
    /// Close handshake finished
    Completed,
    /// Nothing terminal happened in time; the session is still open
    TimedOut,
    /// The session failed with this error
    Errored(AppError),
}

/// Mutable bookkeeping, guarded by one lock.
struct Inner {
    state: SessionState,
    binary_received: bool,
    text_received: bool,
    /// A response was written while still sending
    close_pending: bool,
    /// Our Close frame is out (or about to be)
    close_requested: bool,
    artifacts: Vec<PathBuf>,
    done: Option<oneshot::Sender<AppResult<()>>>,
}

/// The part of a session both transport tasks work on.
pub(crate) struct SessionCore {
    id: Uuid,
    file: Arc<AudioFile>,
    plan: ChunkPlan,
    writer: ResponseWriter,
    limits: TransportLimits,
    bytes_sent: AtomicUsize,
    inner: Mutex<Inner>,
}

impl SessionCore {
    pub(crate) fn new(
        file: Arc<AudioFile>,
        plan: ChunkPlan,
        writer: ResponseWriter,
        limits: TransportLimits,
        done: oneshot::Sender<AppResult<()>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            file,
            plan,
            writer,
            limits,
            bytes_sent: AtomicUsize::new(0),
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                binary_received: false,
                text_received: false,
                close_pending: false,
                close_requested: false,
                artifacts: Vec::new(),
                done: Some(done),
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn path(&self) -> &Path {
        self.file.path()
    }

    pub(crate) fn state(&self) -> SessionState {
        self.inner().state
    }

    pub(crate) fn artifacts(&self) -> Vec<PathBuf> {
        self.inner().artifacts.clone()
    }

    pub(crate) fn bytes_sent(&self) -> usize {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    fn close_requested(&self) -> bool {
        self.inner().close_requested
    }

    /// True once the session reached Closed or Errored.
    fn has_ended(&self) -> bool {
        self.inner().state.is_terminal()
    }

    /// Apply a transition if it is legal; returns whether it happened.
    fn transition(&self, inner: &mut Inner, next: SessionState) -> bool {
        if !inner.state.can_transition_to(next) {
            trace!(
                "Session {} ignoring transition {} -> {}",
                self.id,
                inner.state.as_str(),
                next.as_str()
            );
            return false;
        }
        debug!("Session {}: {} -> {}", self.id, inner.state.as_str(), next.as_str());
        inner.state = next;
        true
    }

    pub(crate) fn begin_connecting(&self) {
        let mut inner = self.inner();
        self.transition(&mut inner, SessionState::Connecting);
    }

    /// The connection never came up; nobody is waiting on the signal yet.
    fn mark_connect_failed(&self) {
        let mut inner = self.inner();
        self.transition(&mut inner, SessionState::Errored);
        inner.done = None;
    }

    /// The pump sent everything. Returns true when a response already came in
    /// and the caller should now start the close handshake.
    fn finish_sending(&self) -> bool {
        let mut inner = self.inner();
        if !self.transition(&mut inner, SessionState::AwaitingResponse) {
            return false;
        }
        info!(
            "Upload of {} finished ({} bytes), waiting for the response",
            self.path().display(),
            self.bytes_sent()
        );

        if inner.close_pending && !inner.close_requested {
            inner.close_requested = true;
            return true;
        }
        false
    }

    /// Per-chunk completion callback.
    fn chunk_sent(&self, chunk: &Chunk) {
        let total = self.bytes_sent.fetch_add(chunk.len, Ordering::Relaxed) + chunk.len;
        trace!(
            "Chunk {}/{} sent ({} bytes, {}/{} total)",
            chunk.index + 1,
            self.plan.len(),
            chunk.len,
            total,
            self.plan.file_len()
        );
    }

    fn exceeded_limit(&self, frame: &InboundFrame) -> Option<usize> {
        let limit = match frame {
            InboundFrame::Binary(_) => self.limits.max_binary_message_bytes,
            InboundFrame::Text(_) => self.limits.max_text_message_bytes,
        };
        (frame.len() > limit).then_some(limit)
    }

    fn signal(inner: &mut Inner, outcome: AppResult<()>) {
        if let Some(done) = inner.done.take() {
            // The receiver is gone when the caller already gave up
            let _ = done.send(outcome);
        }
    }
}

impl ConnectionHandler for SessionCore {
    fn on_open(&self) {
        let mut inner = self.inner();
        if self.transition(&mut inner, SessionState::Sending) {
            info!(
                "Connected, sending {} ({:.2}s of audio) in {} chunks of {} bytes",
                self.path().display(),
                self.file.duration_seconds(),
                self.plan.len(),
                self.plan.chunk_size()
            );
        }
    }

    /// Demultiplex one inbound frame.
    ///
    /// ## Envelope:
    /// At most one binary and one text frame are accepted per session; any
    /// further frame of the same kind is a protocol violation that is logged
    /// and discarded. Once the translated audio (or a written transcript) is
    /// in, the session asks for a normal close. While chunks are still going
    /// out that request is deferred until the upload is complete.
    fn on_frame(&self, frame: InboundFrame) -> FrameDisposition {
        {
            let mut inner = self.inner();
            if !inner.state.accepts_frames() {
                warn!(
                    "Discarding {} frame ({} bytes) received in state {}",
                    frame.kind(),
                    frame.len(),
                    inner.state.as_str()
                );
                return FrameDisposition::Continue;
            }

            let duplicate = match frame {
                InboundFrame::Binary(_) => mem::replace(&mut inner.binary_received, true),
                InboundFrame::Text(_) => mem::replace(&mut inner.text_received, true),
            };
            if duplicate {
                warn!(
                    "Protocol violation: extra {} frame ({} bytes) for {}, discarded",
                    frame.kind(),
                    frame.len(),
                    self.path().display()
                );
                return FrameDisposition::Continue;
            }
        }

        if let Some(limit) = self.exceeded_limit(&frame) {
            self.on_error(AppError::connection(
                self.path(),
                ConnectionPhase::Receive,
                format!("{} message of {} bytes exceeds the {} byte limit", frame.kind(), frame.len(), limit),
            ));
            return FrameDisposition::Abort;
        }

        match self.writer.write(&frame, self.path()) {
            Ok(WriteOutcome::Written(path)) => {
                info!("Received {} response, wrote {}", frame.kind(), path.display());
                let mut inner = self.inner();
                inner.artifacts.push(path);
                if inner.close_requested {
                    FrameDisposition::Continue
                } else if inner.state == SessionState::Sending {
                    if !inner.close_pending {
                        debug!("Response arrived mid-upload, close deferred until all chunks are sent");
                    }
                    inner.close_pending = true;
                    FrameDisposition::Continue
                } else {
                    inner.close_requested = true;
                    FrameDisposition::Close
                }
            }
            Ok(WriteOutcome::Discarded) => FrameDisposition::Continue,
            Err(e) => {
                self.on_error(e);
                FrameDisposition::Abort
            }
        }
    }

    fn on_close(&self, code: Option<u16>, reason: &str) {
        let mut inner = self.inner();
        if inner.state.is_terminal() {
            trace!("Close after terminal state {} ignored", inner.state.as_str());
            return;
        }

        let normal = inner.close_requested || code == Some(u16::from(CloseCode::Normal));
        if normal && self.transition(&mut inner, SessionState::Closed) {
            info!(
                "Session closed (code {}) with {} artifact(s)",
                code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                inner.artifacts.len()
            );
            Self::signal(&mut inner, Ok(()));
            return;
        }

        let error = AppError::connection(
            self.path(),
            ConnectionPhase::Receive,
            format!(
                "service closed the connection (code {}): {}",
                code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                if reason.is_empty() { "no reason given" } else { reason }
            ),
        );
        warn!("{}", error);
        self.transition(&mut inner, SessionState::Errored);
        Self::signal(&mut inner, Err(error));
    }

    fn on_error(&self, error: AppError) {
        let mut inner = self.inner();
        if inner.state.is_terminal() {
            debug!("Error after terminal state {} ignored: {}", inner.state.as_str(), error);
            return;
        }
        warn!("Session {} failed: {}", self.id, error);
        self.transition(&mut inner, SessionState::Errored);
        Self::signal(&mut inner, Err(error));
    }
}

/// Send every chunk of the plan, then the trailing silence.
///
/// ## Pacing:
/// - One binary frame per chunk, in order, each bounded by the send timeout
/// - `chunk_delay` between chunks, never after the last
/// - Stops early (successfully) only if the session already ended
///
/// ## Error Handling:
/// A failed or timed-out chunk ends the upload. A failed silence frame is
/// only logged; the audio itself went out.
pub(crate) async fn send_audio<S>(core: &SessionCore, sink: &AsyncMutex<S>, pacing: &Pacing) -> AppResult<()>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    for chunk in core.plan.chunks() {
        if chunk.is_empty() {
            trace!("Chunk {} is empty, skipped", chunk.index + 1);
            continue;
        }

        {
            let mut sink = sink.lock().await;
            if core.has_ended() {
                debug!("Session ended, stopping upload before chunk {}", chunk.index + 1);
                return Ok(());
            }

            let payload = Message::Binary(core.file.data()[chunk.range()].to_vec());
            match timeout(pacing.send_timeout, sink.send(payload)).await {
                Ok(Ok(())) => core.chunk_sent(&chunk),
                Ok(Err(e)) => {
                    return Err(AppError::connection(
                        core.path(),
                        ConnectionPhase::Send,
                        format!("chunk {}/{} failed: {}", chunk.index + 1, core.plan.len(), e),
                    ))
                }
                Err(_) => {
                    return Err(AppError::UploadTimeout {
                        path: core.path().to_path_buf(),
                        timeout: pacing.send_timeout,
                    })
                }
            }
        }

        if !core.plan.is_last(&chunk) {
            sleep(pacing.chunk_delay).await;
        }
    }

    send_silence(core, sink, pacing).await;
    Ok(())
}

async fn send_silence<S>(core: &SessionCore, sink: &AsyncMutex<S>, pacing: &Pacing)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    if pacing.silence_bytes == 0 {
        return;
    }

    let mut sink = sink.lock().await;
    if core.has_ended() {
        return;
    }

    let silence = Message::Binary(vec![0u8; pacing.silence_bytes]);
    match timeout(pacing.send_timeout, sink.send(silence)).await {
        Ok(Ok(())) => trace!("Sent {} bytes of trailing silence", pacing.silence_bytes),
        Ok(Err(e)) => warn!("Sending trailing silence failed: {}", e),
        Err(_) => warn!(
            "Sending trailing silence timed out after {} ms",
            pacing.send_timeout.as_millis()
        ),
    }
}

/// Pump task body: run the upload and report how it ended.
pub(crate) async fn drive_upload<S>(core: Arc<SessionCore>, sink: Arc<AsyncMutex<S>>, pacing: Pacing)
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match send_audio(&core, &sink, &pacing).await {
        Ok(()) => {
            if core.finish_sending() {
                send_close(&core, &sink).await;
            }
        }
        Err(e) => core.on_error(e),
    }
}

/// Start the close handshake; returns false if the Close frame could not be sent.
async fn send_close<S>(core: &SessionCore, sink: &AsyncMutex<S>) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let close = Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "response received".into(),
    }));
    match sink.lock().await.send(close).await {
        Ok(()) => {
            debug!("Close handshake started");
            true
        }
        Err(e) => {
            core.on_error(AppError::connection(core.path(), ConnectionPhase::Send, e));
            false
        }
    }
}

/// Reader task body: deliver inbound events until the connection ends.
async fn read_frames(
    core: Arc<SessionCore>,
    mut stream: SplitStream<WsStream>,
    sink: Arc<AsyncMutex<WsSink>>,
    idle_timeout: Duration,
) {
    loop {
        let next = match timeout(idle_timeout, stream.next()).await {
            Ok(next) => next,
            // The service is not expected to talk while we are still sending
            Err(_) if core.state() == SessionState::Sending => continue,
            Err(_) => {
                core.on_error(AppError::connection(
                    core.path(),
                    ConnectionPhase::Receive,
                    format!("no response within {} ms", idle_timeout.as_millis()),
                ));
                return;
            }
        };

        let frame = match next {
            Some(Ok(Message::Binary(bytes))) => InboundFrame::Binary(bytes),
            Some(Ok(Message::Text(text))) => InboundFrame::Text(text),
            Some(Ok(Message::Close(close))) => {
                let (code, reason) = match close {
                    Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                    None => (None, String::new()),
                };
                core.on_close(code, &reason);
                return;
            }
            Some(Ok(other)) => {
                trace!("Ignoring control message {:?}", other);
                continue;
            }
            Some(Err(e)) => {
                core.on_error(AppError::connection(core.path(), ConnectionPhase::Receive, e));
                return;
            }
            None => {
                if core.close_requested() {
                    core.on_close(None, "");
                } else {
                    core.on_error(AppError::connection(
                        core.path(),
                        ConnectionPhase::Receive,
                        "connection dropped without a close handshake",
                    ));
                }
                return;
            }
        };

        match core.on_frame(frame) {
            FrameDisposition::Continue => {}
            FrameDisposition::Close => {
                if !send_close(&core, &sink).await {
                    return;
                }
            }
            FrameDisposition::Abort => return,
        }
    }
}

/// One file's trip to the service and back.
pub struct UploadSession {
    core: Arc<SessionCore>,
    sink: Option<Arc<AsyncMutex<WsSink>>>,
    reader: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
    done: Option<oneshot::Receiver<AppResult<()>>>,
}

impl UploadSession {
    /// Plan, connect and start streaming `file`.
    ///
    /// ## Error Handling:
    /// - Planning errors (`EmptyInput`) surface before any connection
    /// - A failed handshake is a `Connection` error in the connect phase
    pub async fn open(file: Arc<AudioFile>, settings: &SessionSettings, uri: &str) -> AppResult<Self> {
        let plan = file.chunk_plan()?;
        debug!(
            "Planned {} chunks of {} bytes for {}, last chunk shortened by {}",
            plan.len(),
            plan.chunk_size(),
            file.path().display(),
            plan.delta()
        );
        let (done_tx, done_rx) = oneshot::channel();
        let core = Arc::new(SessionCore::new(
            file,
            plan,
            settings.writer.clone(),
            settings.limits.clone(),
            done_tx,
        ));
        let span = info_span!("session", id = %core.id, file = %core.path().display());

        core.begin_connecting();
        let stream = match transport::connect(uri, &settings.limits).instrument(span.clone()).await {
            Ok(stream) => stream,
            Err(message) => {
                core.mark_connect_failed();
                return Err(AppError::connection(core.path(), ConnectionPhase::Connect, message));
            }
        };

        let (sink, stream) = stream.split();
        let sink = Arc::new(AsyncMutex::new(sink));
        span.in_scope(|| core.on_open());

        let reader = tokio::spawn(
            read_frames(core.clone(), stream, sink.clone(), settings.limits.idle_timeout).instrument(span.clone()),
        );
        let pump = tokio::spawn(drive_upload(core.clone(), sink.clone(), settings.pacing.clone()).instrument(span));

        Ok(Self {
            core,
            sink: Some(sink),
            reader: Some(reader),
            pump: Some(pump),
            done: Some(done_rx),
        })
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.core.plan
    }

    /// Artifacts written so far, in arrival order.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.core.artifacts()
    }

    pub fn bytes_sent(&self) -> usize {
        self.core.bytes_sent()
    }

    /// Wait up to `limit` for the session to reach a terminal state.
    ///
    /// Timing out leaves the session open; call [`UploadSession::close`] to
    /// release it.
    pub async fn await_completion(&mut self, limit: Duration) -> Completion {
        let Some(done) = self.done.as_mut() else {
            return Completion::Errored(AppError::Internal("session outcome was already collected".to_string()));
        };

        let outcome = match timeout(limit, done).await {
            Err(_) => return Completion::TimedOut,
            Ok(outcome) => outcome,
        };
        self.done = None;

        match outcome {
            Ok(Ok(())) => Completion::Completed,
            Ok(Err(e)) => Completion::Errored(e),
            Err(_) => Completion::Errored(AppError::Internal(
                "session ended without reporting an outcome".to_string(),
            )),
        }
    }

    /// Stop both tasks and release the connection.
    pub async fn close(mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        if let Some(sink) = self.sink.take() {
            match timeout(CLOSE_GRACE, async { sink.lock().await.close().await }).await {
                Ok(Ok(())) => trace!("Write half closed"),
                Ok(Err(e)) => debug!("Closing write half: {}", e),
                Err(_) => debug!("Closing write half timed out"),
            }
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        debug!("Session {} released in state {}", self.core.id, self.core.state().as_str());
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        for task in [self.pump.take(), self.reader.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_support::{pcm_wav_bytes, spawn_server, test_settings, Script};
    use std::fs;
    use tempfile::tempdir;

    fn two_second_file(dir: &Path) -> Arc<AudioFile> {
        let bytes = pcm_wav_bytes(16_000, 64_000 - 44);
        Arc::new(AudioFile::from_bytes(dir.join("talk.wav"), bytes).unwrap())
    }

    fn sending_core(file: Arc<AudioFile>, dir: &Path) -> (Arc<SessionCore>, oneshot::Receiver<AppResult<()>>) {
        let settings = test_settings(dir, false);
        let plan = file.chunk_plan().unwrap();
        let (tx, rx) = oneshot::channel();
        let core = Arc::new(SessionCore::new(file, plan, settings.writer, settings.limits, tx));
        core.begin_connecting();
        core.on_open();
        (core, rx)
    }

    #[tokio::test]
    async fn test_binary_then_text_writes_both_artifacts() {
        let dir = tempdir().unwrap();
        let file = two_second_file(dir.path());
        let settings = test_settings(dir.path(), false);
        let audio: Vec<u8> = (0..10_007u32).map(|i| (i % 256) as u8).collect();
        let (url, server) = spawn_server(vec![Script::Respond {
            expect_bytes: 64_000 + settings.pacing.silence_bytes,
            replies: vec![
                Message::Binary(audio.clone()),
                Message::Text(r#"{"translation":"ciao"}"#.to_string()),
            ],
        }])
        .await;

        let mut session = UploadSession::open(file, &settings, &url).await.unwrap();
        let completion = session.await_completion(Duration::from_secs(10)).await;
        assert!(matches!(completion, Completion::Completed), "{:?}", completion);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.bytes_sent(), 64_000);

        let audio_out = dir.path().join("talk.translation.wav");
        let text_out = dir.path().join("talk.translation.json");
        assert_eq!(session.artifacts(), vec![audio_out.clone(), text_out.clone()]);
        assert_eq!(fs::read(audio_out).unwrap(), audio);
        assert_eq!(fs::read_to_string(text_out).unwrap(), r#"{"translation":"ciao"}"#);
        session.close().await;

        let logs = server.await.unwrap();
        let mut expected = vec![8_000; 8];
        expected.push(settings.pacing.silence_bytes);
        assert_eq!(logs[0].frame_sizes, expected);
    }

    #[tokio::test]
    async fn test_omitted_text_leaves_only_audio() {
        let dir = tempdir().unwrap();
        let file = two_second_file(dir.path());
        let settings = test_settings(dir.path(), true);
        let (url, server) = spawn_server(vec![Script::Respond {
            expect_bytes: 64_000 + settings.pacing.silence_bytes,
            replies: vec![Message::Binary(vec![7; 512]), Message::Text("{}".to_string())],
        }])
        .await;

        let mut session = UploadSession::open(file, &settings, &url).await.unwrap();
        let completion = session.await_completion(Duration::from_secs(10)).await;
        assert!(matches!(completion, Completion::Completed), "{:?}", completion);
        assert_eq!(session.artifacts(), vec![dir.path().join("talk.translation.wav")]);
        assert!(!dir.path().join("talk.translation.json").exists());
        session.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_chunk_stops_the_upload() {
        let dir = tempdir().unwrap();
        let (core, done) = sending_core(two_second_file(dir.path()), dir.path());

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let sink = futures_util::sink::unfold((), move |(), _message: Message| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 2 {
                    Err("connection reset by peer")
                } else {
                    Ok(())
                }
            }
        });
        let sink = Arc::new(AsyncMutex::new(Box::pin(sink)));
        let pacing = test_settings(dir.path(), false).pacing;

        drive_upload(core.clone(), sink, pacing).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(core.bytes_sent(), 16_000);
        assert_eq!(core.state(), SessionState::Errored);
        match done.await.unwrap() {
            Err(AppError::Connection { phase, .. }) => assert_eq!(phase, ConnectionPhase::Send),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_silence_is_not_fatal() {
        let dir = tempdir().unwrap();
        let (core, _done) = sending_core(two_second_file(dir.path()), dir.path());
        let pacing = test_settings(dir.path(), false).pacing;
        let silence_bytes = pacing.silence_bytes;

        let sink = futures_util::sink::unfold((), move |(), message: Message| async move {
            if message.len() == silence_bytes {
                Err("broken pipe")
            } else {
                Ok(())
            }
        });
        let sink = AsyncMutex::new(Box::pin(sink));

        send_audio(&core, &sink, &pacing).await.unwrap();
        assert_eq!(core.bytes_sent(), 64_000);
        assert_eq!(core.state(), SessionState::Sending);
    }

    #[tokio::test]
    async fn test_extra_frames_are_discarded() {
        let dir = tempdir().unwrap();
        let (core, _done) = sending_core(two_second_file(dir.path()), dir.path());
        assert!(!core.finish_sending());

        assert_eq!(core.on_frame(InboundFrame::Binary(vec![1; 64])), FrameDisposition::Close);
        assert_eq!(core.on_frame(InboundFrame::Binary(vec![2; 64])), FrameDisposition::Continue);
        assert_eq!(core.on_frame(InboundFrame::Text("{}".into())), FrameDisposition::Continue);

        assert_eq!(core.artifacts().len(), 2);
        assert_eq!(fs::read(dir.path().join("talk.translation.wav")).unwrap(), vec![1; 64]);
    }

    #[tokio::test]
    async fn test_response_while_sending_defers_the_close() {
        let dir = tempdir().unwrap();
        let (core, _done) = sending_core(two_second_file(dir.path()), dir.path());

        assert_eq!(core.on_frame(InboundFrame::Text("{}".into())), FrameDisposition::Continue);
        assert_eq!(core.on_frame(InboundFrame::Binary(vec![1; 64])), FrameDisposition::Continue);
        assert_eq!(core.state(), SessionState::Sending);
        assert!(!core.has_ended());
        assert_eq!(core.artifacts().len(), 2);

        // The pump picks the close up once, after the last send
        assert!(core.finish_sending());
        assert_eq!(core.state(), SessionState::AwaitingResponse);
        assert!(!core.finish_sending());
    }

    #[tokio::test]
    async fn test_early_response_does_not_cut_the_upload_short() {
        let dir = tempdir().unwrap();
        let settings = test_settings(dir.path(), false);
        let (url, server) = spawn_server(vec![Script::Respond {
            expect_bytes: 8_000,
            replies: vec![Message::Text(r#"{"translation":"ciao","final":true}"#.to_string())],
        }])
        .await;

        let mut session = UploadSession::open(two_second_file(dir.path()), &settings, &url)
            .await
            .unwrap();
        let completion = session.await_completion(Duration::from_secs(10)).await;
        assert!(matches!(completion, Completion::Completed), "{:?}", completion);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.bytes_sent(), 64_000);
        assert_eq!(session.artifacts(), vec![dir.path().join("talk.translation.json")]);
        session.close().await;

        let logs = server.await.unwrap();
        let mut expected = vec![8_000; 8];
        expected.push(settings.pacing.silence_bytes);
        assert_eq!(logs[0].frame_sizes, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_waits_between_chunks_but_not_before_silence() {
        let dir = tempdir().unwrap();
        let (core, _done) = sending_core(two_second_file(dir.path()), dir.path());
        let mut pacing = test_settings(dir.path(), false).pacing;
        pacing.chunk_delay = Duration::from_millis(250);

        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let sink = futures_util::sink::unfold((), move |(), message: Message| {
            log.lock().unwrap().push((message.len(), tokio::time::Instant::now()));
            async { Ok::<(), String>(()) }
        });
        let sink = AsyncMutex::new(Box::pin(sink));

        let started = tokio::time::Instant::now();
        send_audio(&core, &sink, &pacing).await.unwrap();

        let sent = sent.lock().unwrap();
        let sizes: Vec<usize> = sent.iter().map(|(len, _)| *len).collect();
        let mut expected = vec![8_000; 8];
        expected.push(pacing.silence_bytes);
        assert_eq!(sizes, expected);
        assert_eq!(sent[0].1, started);

        let gaps: Vec<Duration> = sent.windows(2).map(|pair| pair[1].1 - pair[0].1).collect();
        for gap in &gaps[..7] {
            assert!(
                *gap >= pacing.chunk_delay && *gap <= pacing.chunk_delay + Duration::from_millis(1),
                "gaps: {:?}",
                gaps
            );
        }
        assert_eq!(gaps[7], Duration::ZERO, "gaps: {:?}", gaps);
    }

    #[tokio::test]
    async fn test_frames_after_close_are_ignored() {
        let dir = tempdir().unwrap();
        let (core, done) = sending_core(two_second_file(dir.path()), dir.path());
        assert!(!core.finish_sending());

        core.on_close(Some(1000), "");
        assert!(done.await.unwrap().is_ok());
        assert_eq!(core.state(), SessionState::Closed);

        assert_eq!(core.on_frame(InboundFrame::Binary(vec![1; 64])), FrameDisposition::Continue);
        assert!(core.artifacts().is_empty());
        assert!(!dir.path().join("talk.translation.wav").exists());
    }

    #[tokio::test]
    async fn test_close_before_the_upload_finished_is_an_error() {
        let dir = tempdir().unwrap();
        let (core, done) = sending_core(two_second_file(dir.path()), dir.path());

        core.on_close(Some(1000), "");
        assert_eq!(core.state(), SessionState::Errored);
        assert!(matches!(done.await.unwrap(), Err(AppError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_abnormal_close_is_an_error() {
        let dir = tempdir().unwrap();
        let (core, done) = sending_core(two_second_file(dir.path()), dir.path());

        core.on_close(Some(1008), "policy violation");
        assert_eq!(core.state(), SessionState::Errored);
        assert!(matches!(done.await.unwrap(), Err(AppError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_oversized_frame_fails_the_session() {
        let dir = tempdir().unwrap();
        let (core, done) = sending_core(two_second_file(dir.path()), dir.path());

        let oversized = "x".repeat(64 * 1024 + 1);
        assert_eq!(core.on_frame(InboundFrame::Text(oversized)), FrameDisposition::Abort);
        assert_eq!(core.state(), SessionState::Errored);
        assert!(done.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_silent_service_times_out_without_closing() {
        let dir = tempdir().unwrap();
        let settings = test_settings(dir.path(), false);
        let (url, server) = spawn_server(vec![Script::Silent]).await;

        let mut session = UploadSession::open(two_second_file(dir.path()), &settings, &url)
            .await
            .unwrap();
        let completion = session.await_completion(Duration::from_millis(300)).await;
        assert!(matches!(completion, Completion::TimedOut));
        assert!(!session.state().is_terminal());
        assert!(session.artifacts().is_empty());

        session.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_connection_is_a_connection_error() {
        let dir = tempdir().unwrap();
        let settings = test_settings(dir.path(), false);
        let (url, server) = spawn_server(vec![Script::DropAfterFirstFrame]).await;

        let mut session = UploadSession::open(two_second_file(dir.path()), &settings, &url)
            .await
            .unwrap();
        let completion = session.await_completion(Duration::from_secs(10)).await;
        assert!(
            matches!(completion, Completion::Errored(AppError::Connection { .. })),
            "{:?}",
            completion
        );
        assert_eq!(session.state(), SessionState::Errored);
        session.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connection_fails_open() {
        let dir = tempdir().unwrap();
        let settings = test_settings(dir.path(), false);
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        drop(listener);

        let err = UploadSession::open(two_second_file(dir.path()), &settings, &url)
            .await
            .err()
            .unwrap();
        match err {
            AppError::Connection { phase, .. } => assert_eq!(phase, ConnectionPhase::Connect),
            other => panic!("unexpected error: {}", other),
        }
    }
}
