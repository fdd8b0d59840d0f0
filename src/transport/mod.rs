//! WebSocket transport to the conversational voice service.
//!
//! The rest of the system never sees JSON or socket state: it pushes typed
//! [`ClientRequest`]s into a channel and receives typed [`TransportEvent`]s
//! through an [`EventHandler`].  [`client`] owns the connection, the
//! reconnect loop and keep-alive pings; [`messages`] owns the wire format.

pub mod client;
pub mod messages;

pub use client::TransportClient;

use crate::config::DeviceConfig;

/// Generate a request id `"{serial}-{unix_nanos}"`.
///
/// Unique per device for all practical purposes; the serial prefix lets the
/// service attribute requests without a separate identity field.
pub fn generate_request_id(serial: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{serial}-{nanos}")
}

// ---------------------------------------------------------------------------
// ClientRequest
// ---------------------------------------------------------------------------

/// Typed outbound requests accepted by the transport.
#[derive(Debug)]
pub enum ClientRequest {
    /// One WAV-wrapped audio chunk of an ongoing capture session.
    AudioStream { request_id: String, wav: Vec<u8> },
    /// End of a capture session, optionally carrying the flushed remainder.
    AudioComplete {
        request_id: String,
        wav: Option<Vec<u8>>,
    },
    /// Cancel the in-flight response for a request (interruption).
    Cancel { request_id: String },
    /// Announce device identity and response preferences.
    UpdateConfig {
        request_id: String,
        device: DeviceConfig,
    },
}

// ---------------------------------------------------------------------------
// TransportEvent
// ---------------------------------------------------------------------------

/// One error entry from a failed exchange.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, Default)]
#[serde(default)]
pub struct ExchangeError {
    pub code: i64,
    pub message: String,
}

/// Typed inbound events delivered to the [`EventHandler`].
#[derive(Debug)]
pub enum TransportEvent {
    /// Decoded PCM bytes of response audio, ready for the playback ring.
    ResponseAudioChunk(Vec<u8>),
    /// The current response's audio stream has ended.
    ResponseAudioComplete,
    /// A fragment of streamed transcript ("user" echoes or "assistant"
    /// responses).
    ResponseText { role: String, text: String },
    /// The whole exchange finished.
    ExchangeComplete {
        success: bool,
        errors: Vec<ExchangeError>,
    },
    /// The service acknowledged a config update.
    ConfigAcked { success: bool, message: String },
}

// ---------------------------------------------------------------------------
// EventHandler
// ---------------------------------------------------------------------------

/// Receiver for transport events.
///
/// Called from the transport read task; implementations must be cheap and
/// non-blocking (write to the playback ring, set a flag, push to a channel).
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: TransportEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_carry_serial_prefix_and_are_unique() {
        let a = generate_request_id("DEV-001");
        let b = generate_request_id("DEV-001");
        assert!(a.starts_with("DEV-001-"));
        assert_ne!(a, b);
        // Suffix is numeric.
        assert!(a["DEV-001-".len()..].chars().all(|c| c.is_ascii_digit()));
    }
}
