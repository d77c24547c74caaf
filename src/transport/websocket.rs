//! WebSocket transport backed by tokio-tungstenite.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{
    CloseReason, Credentials, Transport, TransportCommand, TransportEvent, TransportLink,
    LINK_EVENT_BUFFER,
};
use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client transport
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

/// Validate the endpoint and attach the token as a `token` query parameter.
fn build_url(url: &str, credentials: &Credentials) -> Result<Url, ClientError> {
    let mut parsed = Url::parse(url).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme `{}` in {}",
                other, url
            )))
        }
    }
    if parsed.host_str().is_none() {
        return Err(ClientError::InvalidUrl(format!("missing host in {}", url)));
    }
    if let Some(token) = &credentials.token {
        parsed.query_pairs_mut().append_pair("token", token);
    }
    Ok(parsed)
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn open(
        &self,
        url: &str,
        credentials: &Credentials,
    ) -> Result<TransportLink, ClientError> {
        let endpoint = build_url(url, credentials)?;

        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;

        if let Some(token) = &credentials.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ClientError::InvalidUrl(format!("invalid token header: {}", e)))?;
            request.headers_mut().insert("Authorization", value);
        }

        tracing::debug!(host = ?endpoint.host_str(), "Opening WebSocket");

        let stream = match tokio::time::timeout(self.connect_timeout, connect_async(request)).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => return Err(ClientError::ConnectionRefused(e.to_string())),
            Err(_) => {
                return Err(ClientError::Timeout(format!(
                    "WebSocket connect exceeded {:?}",
                    self.connect_timeout
                )))
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_BUFFER);
        let pump = tokio::spawn(run_pump(stream, cmd_rx, event_tx));

        Ok(TransportLink::new(cmd_tx, event_rx).with_pump(pump))
    }
}

/// Own the socket: forward commands to it and its frames to the event channel.
async fn run_pump(
    stream: WsStream,
    mut commands: mpsc::UnboundedReceiver<TransportCommand>,
    events: mpsc::Sender<TransportEvent>,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(TransportCommand::Send(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            let _ = events.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    Some(TransportCommand::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        let _ = write.close().await;
                        break;
                    }
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Message(text.as_str().to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if events.send(binary_event(&data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(f) => CloseReason::with_code(f.code.into(), f.reason.as_str().to_string()),
                            None => CloseReason::new("server closed connection"),
                        };
                        let _ = events.send(TransportEvent::Closed(reason)).await;
                        break;
                    }
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        let _ = events
                            .send(TransportEvent::Closed(CloseReason::new("stream ended")))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("WebSocket pump stopped");
}

/// Binary frames carry UTF-8 text; anything else is reported as malformed.
fn binary_event(data: &[u8]) -> TransportEvent {
    match std::str::from_utf8(data) {
        Ok(text) => TransportEvent::Message(text.to_string()),
        Err(e) => {
            tracing::warn!(bytes = data.len(), "Binary frame is not UTF-8");
            TransportEvent::Malformed(format!("binary frame of {} bytes: {}", data.len(), e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_frames() {
        assert_eq!(
            binary_event(br#"{"type":"heartbeat"}"#),
            TransportEvent::Message(r#"{"type":"heartbeat"}"#.to_string())
        );
        assert!(matches!(
            binary_event(&[0xff, 0xfe, 0x00]),
            TransportEvent::Malformed(_)
        ));
    }

    #[test]
    fn test_build_url_appends_token() {
        let creds = Credentials::new("42").with_token("abc");
        let url = build_url("wss://api.example.com/ws", &creds).unwrap();
        assert_eq!(url.as_str(), "wss://api.example.com/ws?token=abc");
    }

    #[test]
    fn test_build_url_without_token() {
        let url = build_url("ws://localhost:8081/ws", &Credentials::new("42")).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8081/ws");
    }

    #[test]
    fn test_build_url_rejects_malformed() {
        let creds = Credentials::default();
        assert!(matches!(
            build_url("not a url", &creds),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            build_url("http://example.com/ws", &creds),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_open_malformed_url_fails_fast() {
        let transport = WebSocketTransport::new(Duration::from_secs(1));
        let result = transport.open("::::", &Credentials::default()).await;
        assert!(matches!(result, Err(ClientError::InvalidUrl(_))));
    }
}
