//! Wire format of the chat service protocol.
//!
//! Every message is a JSON text frame with an `action` discriminator and an
//! action-specific `data` object.  Audio payloads travel base64-encoded in
//! `data.buffer`.  [`encode_request`] turns a typed [`ClientRequest`] into an
//! outgoing frame; [`parse_server_message`] turns an incoming frame into a
//! [`TransportEvent`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DeviceConfig;
use crate::transport::{ClientRequest, ExchangeError, TransportEvent};

/// Errors raised while encoding or decoding protocol frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

// ---------------------------------------------------------------------------
// Outbound requests
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AudioPayload {
    buffer: String,
}

#[derive(Debug, Serialize)]
struct AudioRequest {
    id: String,
    action: &'static str,
    data: AudioPayload,
}

#[derive(Debug, Serialize)]
struct BareRequest {
    id: String,
    action: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateConfigData {
    conversation_id: String,
    speech_rate: i32,
    voice_id: String,
    output_text: bool,
    location: Location,
    #[serde(skip_serializing_if = "String::is_empty")]
    timezone: String,
}

#[derive(Debug, Serialize)]
struct UpdateConfigRequest {
    id: String,
    action: &'static str,
    data: UpdateConfigData,
}

fn update_config_request(request_id: String, device: &DeviceConfig) -> UpdateConfigRequest {
    UpdateConfigRequest {
        id: request_id,
        action: "updateConfig",
        data: UpdateConfigData {
            conversation_id: String::new(),
            speech_rate: device.speech_rate,
            voice_id: device.voice_id.clone(),
            output_text: device.output_text,
            location: Location {
                latitude: device.latitude,
                longitude: device.longitude,
            },
            timezone: device.timezone.clone(),
        },
    }
}

/// Serialize a typed request into a JSON text frame.
pub fn encode_request(request: &ClientRequest) -> Result<String, ProtocolError> {
    let json = match request {
        ClientRequest::AudioStream { request_id, wav } => {
            serde_json::to_string(&AudioRequest {
                id: request_id.clone(),
                action: "inputAudioStream",
                data: AudioPayload {
                    buffer: BASE64.encode(wav),
                },
            })?
        }
        ClientRequest::AudioComplete { request_id, wav } => {
            serde_json::to_string(&AudioRequest {
                id: request_id.clone(),
                action: "inputAudioComplete",
                data: AudioPayload {
                    buffer: wav.as_deref().map(|w| BASE64.encode(w)).unwrap_or_default(),
                },
            })?
        }
        ClientRequest::Cancel { request_id } => serde_json::to_string(&BareRequest {
            id: request_id.clone(),
            action: "cancelOutput",
        })?,
        ClientRequest::UpdateConfig { request_id, device } => {
            serde_json::to_string(&update_config_request(request_id.clone(), device))?
        }
    };
    Ok(json)
}

// ---------------------------------------------------------------------------
// Inbound responses
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerEnvelope {
    action: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AudioStreamData {
    buffer: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AudioStreamResponse {
    data: AudioStreamData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TextStreamData {
    role: String,
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TextStreamResponse {
    data: TextStreamData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChatCompleteData {
    errors: Vec<ExchangeError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChatCompleteResponse {
    success: bool,
    data: ChatCompleteData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpdateConfigResponse {
    success: bool,
    message: String,
}

/// Parse an incoming JSON text frame into a [`TransportEvent`].
///
/// Returns `Ok(None)` for actions the client deliberately ignores (for
/// example `outputTextComplete`) and for unknown actions, which are logged
/// at debug level so protocol additions stay visible.
pub fn parse_server_message(text: &str) -> Result<Option<TransportEvent>, ProtocolError> {
    let envelope: ServerEnvelope = serde_json::from_str(text)?;

    let event = match envelope.action.as_str() {
        "outputAudioStream" => {
            let resp: AudioStreamResponse = serde_json::from_str(text)?;
            let pcm = BASE64.decode(resp.data.buffer.as_bytes())?;
            TransportEvent::ResponseAudioChunk(pcm)
        }
        "outputAudioComplete" => TransportEvent::ResponseAudioComplete,
        "outputTextStream" => {
            let resp: TextStreamResponse = serde_json::from_str(text)?;
            TransportEvent::ResponseText {
                role: resp.data.role,
                text: resp.data.text,
            }
        }
        "outputTextComplete" => return Ok(None),
        "chatComplete" => {
            let resp: ChatCompleteResponse = serde_json::from_str(text)?;
            TransportEvent::ExchangeComplete {
                success: resp.success,
                errors: resp.data.errors,
            }
        }
        "updateConfig" => {
            let resp: UpdateConfigResponse = serde_json::from_str(text)?;
            TransportEvent::ConfigAcked {
                success: resp.success,
                message: resp.message,
            }
        }
        other => {
            log::debug!("ignoring unhandled server action: {other}");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
