use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ClientFrame, MessageBody, ProtocolError, ServerFrame};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
enum ClientMessage {
    Connect {
        identity: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        heartbeat_ms: u64,
    },
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
    Send {
        channel: String,
        body: Value,
    },
    Ping {
        nonce: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ServerMessage {
    #[serde(rename = "connected")]
    Connected {
        #[serde(default)]
        session_id: Option<String>,
    },
    #[serde(rename = "message")]
    Message {
        destination: String,
        #[serde(default)]
        payload: Value,
    },
    #[serde(rename = "subscribed")]
    Subscribed {
        #[serde(rename = "payload")]
        channels: Vec<String>,
    },
    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        #[serde(rename = "payload")]
        channels: Vec<String>,
    },
    #[serde(rename = "pong")]
    Pong {
        #[serde(default)]
        nonce: Option<u64>,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

pub(super) fn encode(frame: &ClientFrame) -> Result<String, ProtocolError> {
    let message = match frame {
        ClientFrame::Connect {
            identity,
            token,
            heartbeat_ms,
            ..
        } => ClientMessage::Connect {
            identity: identity.clone(),
            token: token.clone(),
            heartbeat_ms: *heartbeat_ms,
        },
        ClientFrame::Subscribe { channel } => ClientMessage::Subscribe {
            channel: channel.clone(),
        },
        ClientFrame::Unsubscribe { channel } => ClientMessage::Unsubscribe {
            channel: channel.clone(),
        },
        ClientFrame::Send { channel, payload } => ClientMessage::Send {
            channel: channel.clone(),
            body: payload.clone(),
        },
        ClientFrame::Ping { nonce } => ClientMessage::Ping { nonce: *nonce },
    };

    serde_json::to_string(&message).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}

pub(super) fn decode(text: &str) -> Result<ServerFrame, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::MalformedFrame("missing `type` field".to_string()))?
        .to_string();

    let message: ServerMessage = serde_json::from_value(value).map_err(|e| {
        if e.to_string().contains("unknown variant") {
            ProtocolError::UnknownFrame(kind)
        } else {
            ProtocolError::MalformedFrame(e.to_string())
        }
    })?;

    Ok(match message {
        ServerMessage::Connected { session_id } => ServerFrame::Connected { session_id },
        ServerMessage::Message {
            destination,
            payload,
        } => ServerFrame::Message {
            destination,
            body: MessageBody::Json(payload),
        },
        ServerMessage::Subscribed { channels } => ServerFrame::Subscribed { channels },
        ServerMessage::Unsubscribed { channels } => ServerFrame::Unsubscribed { channels },
        ServerMessage::Pong { nonce } => ServerFrame::Pong { nonce },
        ServerMessage::Heartbeat => ServerFrame::Heartbeat,
        ServerMessage::Error { code, message } => ServerFrame::Error { code, message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_subscribe() {
        let text = encode(&ClientFrame::Subscribe {
            channel: "user/42/inbox".to_string(),
        })
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "subscribe", "payload": {"channel": "user/42/inbox"}})
        );
    }

    #[test]
    fn test_encode_connect_omits_missing_token() {
        let text = encode(&ClientFrame::Connect {
            identity: "42".to_string(),
            token: None,
            host: "localhost".to_string(),
            heartbeat_ms: 30_000,
        })
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "connect");
        assert_eq!(value["payload"]["identity"], "42");
        assert!(value["payload"].get("token").is_none());
    }

    #[test]
    fn test_encode_send_and_ping() {
        let text = encode(&ClientFrame::Send {
            channel: "chat/7".to_string(),
            payload: json!({"text": "hi"}),
        })
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["payload"]["body"]["text"], "hi");

        let text = encode(&ClientFrame::Ping { nonce: 9 }).unwrap();
        assert_eq!(text, r#"{"type":"ping","payload":{"nonce":9}}"#);
    }

    #[test]
    fn test_client_frame_shapes() {
        let connect = encode(&ClientFrame::Connect {
            identity: "42".to_string(),
            token: Some("t".to_string()),
            host: "localhost".to_string(),
            heartbeat_ms: 0,
        })
        .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&connect).unwrap(),
            json!({"type": "connect", "payload": {"identity": "42", "token": "t", "heartbeat_ms": 0}})
        );

        let send = encode(&ClientFrame::Send {
            channel: "chat/7".to_string(),
            payload: json!([1, 2]),
        })
        .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&send).unwrap(),
            json!({"type": "send", "payload": {"channel": "chat/7", "body": [1, 2]}})
        );
    }

    #[test]
    fn test_decode_message() {
        let frame = decode(
            r#"{"type":"message","destination":"user/42/inbox","payload":{"from":"7"}}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            ServerFrame::Message {
                destination: "user/42/inbox".to_string(),
                body: MessageBody::Json(json!({"from": "7"})),
            }
        );
    }

    #[test]
    fn test_decode_connected_and_pong() {
        assert_eq!(
            decode(r#"{"type":"connected","session_id":"s-1"}"#).unwrap(),
            ServerFrame::Connected {
                session_id: Some("s-1".to_string())
            }
        );
        assert_eq!(
            decode(r#"{"type":"connected"}"#).unwrap(),
            ServerFrame::Connected { session_id: None }
        );
        assert_eq!(
            decode(r#"{"type":"pong","nonce":3}"#).unwrap(),
            ServerFrame::Pong { nonce: Some(3) }
        );
        assert_eq!(
            decode(r#"{"type":"heartbeat"}"#).unwrap(),
            ServerFrame::Heartbeat
        );
    }

    #[test]
    fn test_decode_subscribed_ack() {
        assert_eq!(
            decode(r#"{"type":"subscribed","payload":["a","b"]}"#).unwrap(),
            ServerFrame::Subscribed {
                channels: vec!["a".to_string(), "b".to_string()]
            }
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode("not json"),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode(r#"{"payload":1}"#),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert_eq!(
            decode(r#"{"type":"teleport"}"#),
            Err(ProtocolError::UnknownFrame("teleport".to_string()))
        );
        assert!(matches!(
            decode(r#"{"type":"message"}"#),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }
}
