use tokio_tungstenite::tungstenite::Message;

use crate::error::CoordinatorError;

use super::types::WireMessage;

pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// A decoded WebSocket frame.
pub(crate) enum Frame {
    Message(WireMessage),
    /// Ping/pong and raw frames; tungstenite answers pings on its own.
    Control,
    Closed,
}

/// Decodes one JSON wire message.
///
/// # Errors
///
/// Returns `MalformedMessage` when the payload is too large or fails schema
/// validation.
pub fn decode_message(text: &str) -> Result<WireMessage, CoordinatorError> {
    if text.len() > MAX_MESSAGE_BYTES {
        return Err(CoordinatorError::MalformedMessage {
            reason: CoordinatorError::WireMessageTooLarge {
                max_bytes: MAX_MESSAGE_BYTES,
            }
            .to_string(),
        });
    }
    serde_json::from_str::<WireMessage>(text).map_err(|err| CoordinatorError::MalformedMessage {
        reason: err.to_string(),
    })
}

/// Encodes a wire message as a WebSocket text frame.
///
/// # Errors
///
/// Returns an error when serialization fails.
pub fn encode_message(message: &WireMessage) -> Result<Message, CoordinatorError> {
    let payload =
        serde_json::to_string(message).map_err(|err| CoordinatorError::Serialize {
            context: "wire message",
            source: err,
        })?;
    Ok(Message::Text(payload))
}

pub(crate) fn decode_frame(frame: Message) -> Result<Frame, CoordinatorError> {
    match frame {
        Message::Text(text) => decode_message(&text).map(Frame::Message),
        Message::Binary(bytes) => {
            let text =
                std::str::from_utf8(&bytes).map_err(|err| CoordinatorError::MalformedMessage {
                    reason: format!("Wire message was not valid UTF-8: {}", err),
                })?;
            decode_message(text).map(Frame::Message)
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(Frame::Control),
        Message::Close(_) => Ok(Frame::Closed),
    }
}
