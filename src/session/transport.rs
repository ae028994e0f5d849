//! # WebSocket Transport
//!
//! Opens the duplex connection with the protocol limits taken from
//! configuration. The core never defaults these; they arrive fully resolved.

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use std::time::Duration;
use tracing::debug;

/// Client side of a WebSocket connection.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Protocol-level limits applied to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportLimits {
    /// Largest binary message accepted from the service
    pub max_binary_message_bytes: usize,
    /// Largest text message accepted from the service
    pub max_text_message_bytes: usize,
    /// Longest period without traffic in either direction
    pub idle_timeout: Duration,
    /// Largest single inbound frame
    pub input_buffer_bytes: usize,
}

impl TransportLimits {
    /// Translate the limits into a tungstenite configuration.
    ///
    /// tungstenite has one message limit for both kinds, so it gets the larger
    /// of the two; the session enforces the per-kind limits itself.
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_binary_message_bytes.max(self.max_text_message_bytes));
        config.max_frame_size = Some(self.input_buffer_bytes);
        config
    }
}

/// Connect to `uri`, bounded by the idle timeout.
///
/// ## Returns:
/// - **Ok(WsStream)**: Upgrade handshake completed
/// - **Err(String)**: Why the connection could not be established
pub async fn connect(uri: &str, limits: &TransportLimits) -> Result<WsStream, String> {
    let attempt = connect_async_with_config(uri, Some(limits.websocket_config()), true);

    match timeout(limits.idle_timeout, attempt).await {
        Ok(Ok((stream, response))) => {
            debug!("WebSocket handshake completed with status {}", response.status());
            Ok(stream)
        }
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!(
            "no handshake within {} ms",
            limits.idle_timeout.as_millis()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> TransportLimits {
        TransportLimits {
            max_binary_message_bytes: 8 * 1024 * 1024,
            max_text_message_bytes: 64 * 1024,
            idle_timeout: Duration::from_secs(2),
            input_buffer_bytes: 4 * 1024 * 1024,
        }
    }

    #[test]
    fn test_websocket_config_uses_larger_message_limit() {
        let config = limits().websocket_config();
        assert_eq!(config.max_message_size, Some(8 * 1024 * 1024));
        assert_eq!(config.max_frame_size, Some(4 * 1024 * 1024));
    }

    #[tokio::test]
    async fn test_connect_refused_is_reported() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect(&format!("ws://127.0.0.1:{}/speech/translate", port), &limits())
            .await
            .unwrap_err();
        assert!(!err.is_empty());
    }
}
