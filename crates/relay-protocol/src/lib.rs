//! Relay Protocol - Wire protocol for client/server envelopes
//!
//! Envelopes are JSON objects, one per line, keyed by an `action` field.
//! This crate provides the typed envelope model, line framing, and the
//! decode step that turns raw bytes into an exhaustive request enum.

pub mod frame;
pub mod message;
pub mod parse;

pub use frame::{FrameBuffer, MAX_FRAME_BYTES};
pub use message::{
    ChatMessage, ClientRequest, ServerMessage, ServerResponse, UserInfo, ERROR_ALREADY_REGISTERED,
    ERROR_MALFORMED, ERROR_NAME_TAKEN, ERROR_NOT_OWNER,
};
pub use parse::{decode_request, decode_server_message, encode_line, DecodeError};
