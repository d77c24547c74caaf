//! STOMP 1.2 text frames.
//!
//! One frame per transport message. A message made only of end-of-line
//! characters is a heart-beat.

use super::{ClientFrame, MessageBody, ProtocolError, ServerFrame};

const NULL: char = '\0';

/// Subscription id used for a channel; stable so UNSUBSCRIBE can address it.
fn subscription_id(channel: &str) -> String {
    format!("sub-{}", channel)
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, ProtocolError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ProtocolError::MalformedFrame(format!(
                    "invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

fn frame(command: &str, headers: &[(&str, String)], body: &str, escape: bool) -> String {
    let mut out = String::from(command);
    out.push('\n');
    for (name, value) in headers {
        out.push_str(name);
        out.push(':');
        if escape {
            out.push_str(&escape_header(value));
        } else {
            out.push_str(value);
        }
        out.push('\n');
    }
    out.push('\n');
    out.push_str(body);
    out.push(NULL);
    out
}

pub(super) fn encode(client_frame: &ClientFrame) -> String {
    match client_frame {
        ClientFrame::Connect {
            identity,
            token,
            host,
            heartbeat_ms,
        } => {
            let mut headers = vec![
                ("accept-version", "1.2".to_string()),
                ("host", host.clone()),
                ("login", identity.clone()),
            ];
            if let Some(token) = token {
                headers.push(("passcode", token.clone()));
            }
            headers.push(("heart-beat", format!("{},{}", heartbeat_ms, heartbeat_ms)));
            // CONNECT headers are not escaped in STOMP 1.2
            frame("CONNECT", &headers, "", false)
        }
        ClientFrame::Subscribe { channel } => frame(
            "SUBSCRIBE",
            &[
                ("id", subscription_id(channel)),
                ("destination", channel.clone()),
                ("ack", "auto".to_string()),
            ],
            "",
            true,
        ),
        ClientFrame::Unsubscribe { channel } => frame(
            "UNSUBSCRIBE",
            &[("id", subscription_id(channel))],
            "",
            true,
        ),
        ClientFrame::Send { channel, payload } => {
            let body = payload.to_string();
            frame(
                "SEND",
                &[
                    ("destination", channel.clone()),
                    ("content-type", "application/json".to_string()),
                    ("content-length", body.len().to_string()),
                ],
                &body,
                true,
            )
        }
        ClientFrame::Ping { .. } => "\n".to_string(),
    }
}

struct ParsedFrame {
    command: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl ParsedFrame {
    fn header(&self, name: &str) -> Option<&str> {
        // The first occurrence of a repeated header wins
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

fn parse(text: &str) -> Result<ParsedFrame, ProtocolError> {
    let (head, rest) = text
        .split_once("\n\n")
        .or_else(|| text.split_once("\r\n\r\n"))
        .ok_or_else(|| ProtocolError::MalformedFrame("missing header terminator".to_string()))?;

    let mut lines = head.lines();
    let command = lines
        .next()
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ProtocolError::MalformedFrame("missing command".to_string()))?;

    let escaped = command != "CONNECTED";
    let mut headers = Vec::new();
    for line in lines {
        let line = line.trim_end_matches('\r');
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedFrame(format!("invalid header line: {}", line)))?;
        let (name, value) = if escaped {
            (unescape_header(name)?, unescape_header(value)?)
        } else {
            (name.to_string(), value.to_string())
        };
        headers.push((name, value));
    }

    let body = match rest.find(NULL) {
        Some(end) => &rest[..end],
        None => return Err(ProtocolError::MalformedFrame("missing NULL terminator".to_string())),
    };

    Ok(ParsedFrame {
        command,
        headers,
        body: body.to_string(),
    })
}

pub(super) fn decode(text: &str) -> Result<ServerFrame, ProtocolError> {
    let trimmed = text.trim_start_matches(['\r', '\n']);
    if trimmed.is_empty() {
        return Ok(ServerFrame::Pong { nonce: None });
    }

    let parsed = parse(trimmed)?;
    match parsed.command.as_str() {
        "CONNECTED" => Ok(ServerFrame::Connected {
            session_id: parsed.header("session").map(str::to_string),
        }),
        "MESSAGE" => {
            let destination = parsed
                .header("destination")
                .ok_or(ProtocolError::MissingHeader("destination"))?
                .to_string();
            Ok(ServerFrame::Message {
                destination,
                body: MessageBody::Text(parsed.body),
            })
        }
        "RECEIPT" => Ok(ServerFrame::Receipt {
            id: parsed
                .header("receipt-id")
                .ok_or(ProtocolError::MissingHeader("receipt-id"))?
                .to_string(),
        }),
        "ERROR" => Ok(ServerFrame::Error {
            code: "STOMP_ERROR".to_string(),
            message: parsed
                .header("message")
                .map(str::to_string)
                .unwrap_or_else(|| parsed.body.clone()),
        }),
        other => Err(ProtocolError::UnknownFrame(other.to_string())),
    }
}
