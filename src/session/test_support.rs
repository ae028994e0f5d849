//! Fixtures shared by the session, audio and driver tests: WAV builders and a
//! scripted WebSocket service on localhost.

use crate::output::ResponseWriter;
use crate::session::transport::TransportLimits;
use crate::session::{Pacing, SessionSettings};
use futures_util::{SinkExt, StreamExt};
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// Write a mono 16-bit sine tone and return the file length.
pub fn write_tone(path: &Path, sample_rate: u32, duration_ms: u32) -> usize {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let samples = sample_rate as u64 * duration_ms as u64 / 1_000;
    for n in 0..samples {
        let t = n as f32 / sample_rate as f32;
        let sample = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.3;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
    std::fs::metadata(path).unwrap().len() as usize
}

/// A canonical 44-byte PCM header (mono, 16-bit) followed by `pcm_len` bytes.
pub fn pcm_wav_bytes(sample_rate: u32, pcm_len: usize) -> Vec<u8> {
    let byte_rate = sample_rate * 2;
    let mut bytes = Vec::with_capacity(44 + pcm_len);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + pcm_len as u32).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&byte_rate.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes()); // block align
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&(pcm_len as u32).to_le_bytes());
    bytes.extend((0..pcm_len).map(|i| (i % 251) as u8));
    bytes
}

/// Session settings with millisecond pacing so tests finish quickly.
pub fn test_settings(output_dir: &Path, omit_text: bool) -> SessionSettings {
    SessionSettings {
        limits: TransportLimits {
            max_binary_message_bytes: 1024 * 1024,
            max_text_message_bytes: 64 * 1024,
            idle_timeout: Duration::from_secs(5),
            input_buffer_bytes: 1024 * 1024,
        },
        pacing: Pacing {
            chunk_delay: Duration::from_millis(1),
            silence_bytes: 3_200,
            send_timeout: Duration::from_secs(2),
        },
        writer: ResponseWriter::new(output_dir, ".translation", omit_text),
        response_timeout: Duration::from_secs(5),
    }
}

/// What the scripted service does with one accepted connection.
pub enum Script {
    /// Collect binary frames until `expect_bytes` arrived, send `replies`,
    /// then keep reading until the client goes away
    Respond {
        expect_bytes: usize,
        replies: Vec<Message>,
    },
    /// Read one frame and drop the socket without a close handshake
    DropAfterFirstFrame,
    /// Read everything and never answer
    Silent,
}

/// Binary frame sizes the service saw on one connection.
#[derive(Debug, Default)]
pub struct ConnectionLog {
    pub frame_sizes: Vec<usize>,
}

impl ConnectionLog {
    pub fn total_bytes(&self) -> usize {
        self.frame_sizes.iter().sum()
    }
}

/// Serve one connection per script, in order. Returns the `ws://` URL and a
/// handle that yields the per-connection logs once all scripts ran.
pub async fn spawn_server(scripts: Vec<Script>) -> (String, JoinHandle<Vec<ConnectionLog>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/speech/translate", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut logs = Vec::new();
        for script in scripts {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let mut log = ConnectionLog::default();

            match script {
                Script::Respond {
                    expect_bytes,
                    replies,
                } => {
                    while log.total_bytes() < expect_bytes {
                        match ws.next().await {
                            Some(Ok(Message::Binary(bytes))) => log.frame_sizes.push(bytes.len()),
                            Some(Ok(_)) => {}
                            _ => break,
                        }
                    }
                    for reply in replies {
                        if ws.send(reply).await.is_err() {
                            break;
                        }
                    }
                    drain(&mut ws, &mut log).await;
                }
                Script::DropAfterFirstFrame => {
                    if let Some(Ok(Message::Binary(bytes))) = ws.next().await {
                        log.frame_sizes.push(bytes.len());
                    }
                    drop(ws);
                }
                Script::Silent => drain(&mut ws, &mut log).await,
            }
            logs.push(log);
        }
        logs
    });

    (url, handle)
}

async fn drain<S>(ws: &mut WebSocketStream<S>, log: &mut ConnectionLog)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Binary(bytes) = message {
            log.frame_sizes.push(bytes.len());
        }
    }
}
