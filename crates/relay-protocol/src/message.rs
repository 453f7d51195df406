//! Protocol message types for client/server communication.

use relay_core::AccountName;
use serde::{Deserialize, Serialize};

/// Error text sent when a name is already owned by another connection.
pub const ERROR_NAME_TAKEN: &str = "name already taken";

/// Error text sent for envelopes that cannot be acted on.
pub const ERROR_MALFORMED: &str = "malformed request";

/// Error text sent when a registered connection announces presence again.
pub const ERROR_ALREADY_REGISTERED: &str = "connection already registered";

/// Error text sent when EXIT names an account held by another connection.
pub const ERROR_NOT_OWNER: &str = "account not owned by this connection";

/// User block carried by a presence envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub account_name: AccountName,
}

/// Addressed text message.
///
/// Received from the sender as a `message` envelope and forwarded to the
/// destination in the same shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender-side UNIX timestamp
    pub time: f64,

    #[serde(rename = "from")]
    pub sender: AccountName,

    #[serde(rename = "to")]
    pub destination: AccountName,

    #[serde(rename = "mess_text")]
    pub text: String,
}

/// Requests a client may send, discriminated by `action`.
///
/// Deserialization fails closed: an unknown action or a missing required
/// field is an error, never a partially filled request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Announce presence and claim an account name
    Presence { time: f64, user: UserInfo },

    /// Route a message to another account
    Message(ChatMessage),

    /// Leave the relay
    Exit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<f64>,
        account_name: AccountName,
    },
}

impl ClientRequest {
    /// Creates a presence request.
    pub fn presence(time: f64, account_name: AccountName) -> Self {
        Self::Presence {
            time,
            user: UserInfo { account_name },
        }
    }

    /// Creates a message request.
    pub fn message(
        time: f64,
        sender: AccountName,
        destination: AccountName,
        text: impl Into<String>,
    ) -> Self {
        Self::Message(ChatMessage {
            time,
            sender,
            destination,
            text: text.into(),
        })
    }

    /// Creates an exit request.
    pub fn exit(account_name: AccountName) -> Self {
        Self::Exit {
            time: None,
            account_name,
        }
    }

    /// Short label for logging.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Presence { .. } => "presence",
            Self::Message(_) => "message",
            Self::Exit { .. } => "exit",
        }
    }
}

/// Status response sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResponse {
    pub response: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServerResponse {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;

    /// `RESPONSE_200`: success, no body.
    pub fn ok() -> Self {
        Self {
            response: Self::OK,
            error: None,
        }
    }

    /// `RESPONSE_400` with an error string.
    pub fn bad_request(error: impl Into<String>) -> Self {
        Self {
            response: Self::BAD_REQUEST,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.response == Self::OK
    }
}

/// Anything a client can receive from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Status response to the client's own request
    Response(ServerResponse),

    /// Message relayed from another client
    Relayed(ClientRequest),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn name(s: &str) -> AccountName {
        AccountName::parse(s).unwrap()
    }

    #[test]
    fn test_presence_wire_shape() {
        let msg = ClientRequest::presence(1.5, name("alice"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"action": "presence", "time": 1.5, "user": {"account_name": "alice"}})
        );
    }

    #[test]
    fn test_message_wire_shape_uses_short_keys() {
        let msg = ClientRequest::message(2.0, name("alice"), name("bob"), "hi bob");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "message",
                "time": 2.0,
                "from": "alice",
                "to": "bob",
                "mess_text": "hi bob"
            })
        );
    }

    #[test]
    fn test_exit_omits_absent_time() {
        let json = serde_json::to_string(&ClientRequest::exit(name("alice"))).unwrap();
        assert!(json.contains("\"action\":\"exit\""));
        assert!(!json.contains("time"));
    }

    #[test]
    fn test_response_200_has_no_error_key() {
        let json = serde_json::to_string(&ServerResponse::ok()).unwrap();
        assert_eq!(json, "{\"response\":200}");
    }

    #[test]
    fn test_response_400_carries_error() {
        let json = serde_json::to_string(&ServerResponse::bad_request(ERROR_NAME_TAKEN)).unwrap();
        assert_eq!(json, "{\"response\":400,\"error\":\"name already taken\"}");
    }

    #[test]
    fn test_server_message_distinguishes_response_from_relay() {
        let resp: ServerMessage = serde_json::from_str("{\"response\":200}").unwrap();
        assert_eq!(resp, ServerMessage::Response(ServerResponse::ok()));

        let relayed: ServerMessage = serde_json::from_value(json!({
            "action": "message", "time": 3.0, "from": "a", "to": "b", "mess_text": "x"
        }))
        .unwrap();
        match relayed {
            ServerMessage::Relayed(ClientRequest::Message(m)) => assert_eq!(m.text, "x"),
            other => panic!("Expected relayed message, got {other:?}"),
        }
    }

    #[test]
    fn test_action_labels() {
        assert_eq!(ClientRequest::presence(0.0, name("a")).action(), "presence");
        assert_eq!(ClientRequest::exit(name("a")).action(), "exit");
    }
}
