//! Decoding and encoding of envelopes.
//!
//! Decoding is split in two stages so the caller can tell the failures
//! apart:
//! 1. bytes → JSON object. Failing here means the peer is not speaking
//!    the protocol at all ([`DecodeError::Unparseable`]).
//! 2. JSON object → [`ClientRequest`]. Failing here means a well-formed
//!    envelope with an unknown action or missing fields
//!    ([`DecodeError::Malformed`]).

use serde::Serialize;
use thiserror::Error;

use crate::message::{ClientRequest, ServerMessage};

/// Errors produced while turning bytes into envelopes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// A frame grew past the size limit before its terminator arrived.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The frame is not a UTF-8 JSON object.
    #[error("unparseable envelope: {0}")]
    Unparseable(String),

    /// The frame is a JSON object but not a valid request.
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl DecodeError {
    /// Returns true when no further well-formed traffic can be assumed
    /// from this peer.
    pub fn is_unparseable(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. } | Self::Unparseable(_))
    }
}

fn object_from_frame(frame: &[u8]) -> Result<serde_json::Value, DecodeError> {
    let text = std::str::from_utf8(frame).map_err(|e| DecodeError::Unparseable(e.to_string()))?;

    let value: serde_json::Value =
        serde_json::from_str(text.trim()).map_err(|e| DecodeError::Unparseable(e.to_string()))?;

    if !value.is_object() {
        return Err(DecodeError::Unparseable(
            "envelope is not a JSON object".to_string(),
        ));
    }

    Ok(value)
}

/// Decodes one client frame (without its line terminator).
pub fn decode_request(frame: &[u8]) -> Result<ClientRequest, DecodeError> {
    let value = object_from_frame(frame)?;
    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Decodes one server frame. Used by clients and tests.
pub fn decode_server_message(frame: &[u8]) -> Result<ServerMessage, DecodeError> {
    let value = object_from_frame(frame)?;
    serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Encodes a value as one newline-terminated frame.
pub fn encode_line<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut encoded = serde_json::to_vec(value)?;
    encoded.push(b'\n');
    Ok(encoded)
}
