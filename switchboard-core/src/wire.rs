//! Control-plane wire protocol — newline-delimited JSON.
//!
//! One JSON object per line, `\n`-terminated. `type` discriminates the
//! message.

use serde::{Deserialize, Serialize};

/// Messages sent from a registering app to the control server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Register(RegisterMsg),
    Unregister(UnregisterMsg),
    /// Diagnostic query — a read-only introspection surface over the
    /// current registration table.
    Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMsg {
    pub origin: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterMsg {
    pub origin: String,
}

/// Messages sent from the control server back to a client connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Ack(AckMsg),
    StatusAck(StatusAckMsg),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckMsg {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl AckMsg {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusAckMsg {
    pub apps: Vec<StatusApp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusApp {
    pub hostname: String,
    pub upstream_host: String,
    pub upstream_port: u16,
    pub owner: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_roundtrips_from_literal_json() {
        let line = r#"{"type":"register","origin":"https://app-a.localhost","host":"127.0.0.1","port":53211}"#;
        let msg: ClientMessage = serde_json::from_str(line).unwrap();
        match msg {
            ClientMessage::Register(r) => {
                assert_eq!(r.origin, "https://app-a.localhost");
                assert_eq!(r.host, "127.0.0.1");
                assert_eq!(r.port, 53211);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unregister_parses() {
        let line = r#"{"type":"unregister","origin":"https://app-a.localhost"}"#;
        let msg: ClientMessage = serde_json::from_str(line).unwrap();
        assert!(matches!(msg, ClientMessage::Unregister(_)));
    }

    #[test]
    fn unknown_type_fails_to_parse_as_enum() {
        let line = r#"{"type":"frobnicate"}"#;
        let result: Result<ClientMessage, _> = serde_json::from_str(line);
        assert!(result.is_err());
    }

    #[test]
    fn ack_success_serializes_without_error_field() {
        let ack = ServerMessage::Ack(AckMsg::ok());
        let json = serde_json::to_string(&ack).unwrap();
        assert_eq!(json, r#"{"type":"ack","success":true}"#);
    }

    #[test]
    fn ack_failure_includes_error_field() {
        let ack = ServerMessage::Ack(AckMsg::err("hostname already registered"));
        let json = serde_json::to_string(&ack).unwrap();
        assert_eq!(
            json,
            r#"{"type":"ack","success":false,"error":"hostname already registered"}"#
        );
    }
}
