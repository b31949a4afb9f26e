//! SignalR JSON hub protocol (version 1) framing.
//!
//! Every message is a JSON object terminated by the ASCII record separator. One
//! WebSocket text message can carry several records, and a record can be split
//! across messages, so inbound text goes through [`FrameBuffer`].

use serde_json::{json, Value};

use crate::error::{HubError, HubResult};
use crate::models::event::{OutboundCall, RawInvocation};

pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Longest record accepted before its separator shows up.
pub const MAX_RECORD_LEN: usize = 1024 * 1024;

const INVOCATION: u64 = 1;
const PING: u64 = 6;
const CLOSE: u64 = 7;

/// Inbound hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    Invocation(RawInvocation),
    Ping,
    Close { error: Option<String> },
    /// Stream items, completions and anything newer; the client has no use for them.
    Other(u64),
}

pub fn handshake_request() -> String {
    record(&json!({ "protocol": "json", "version": 1 }))
}

/// Check the handshake response record. An `error` member means the hub refused us.
pub fn parse_handshake_response(record: &str) -> HubResult<()> {
    let value: Value = serde_json::from_str(record)
        .map_err(|e| HubError::ConnectFailure(format!("bad handshake response: {e}")))?;
    match value.get("error").and_then(Value::as_str) {
        Some(error) => Err(HubError::ConnectFailure(format!("handshake rejected: {error}"))),
        None => Ok(()),
    }
}

/// Non-blocking invocation: no `invocationId`, so the hub sends no completion.
pub fn encode_invocation(call: &OutboundCall) -> String {
    record(&json!({
        "type": INVOCATION,
        "target": call.target(),
        "arguments": call.arguments(),
    }))
}

pub fn encode_ping() -> String {
    record(&json!({ "type": PING }))
}

pub fn encode_close() -> String {
    record(&json!({ "type": CLOSE }))
}

pub fn decode_frame(record: &str) -> HubResult<HubFrame> {
    let value: Value = serde_json::from_str(record)?;
    let kind = value
        .get("type")
        .and_then(Value::as_u64)
        .ok_or_else(|| HubError::DecodeFailure {
            event: "hub frame".to_string(),
            reason: "missing message type".to_string(),
        })?;
    let frame = match kind {
        INVOCATION => {
            let target = value
                .get("target")
                .and_then(Value::as_str)
                .ok_or_else(|| HubError::DecodeFailure {
                    event: "invocation".to_string(),
                    reason: "missing target".to_string(),
                })?;
            let arguments = match value.get("arguments") {
                Some(Value::Array(arguments)) => arguments.clone(),
                None | Some(Value::Null) => Vec::new(),
                Some(_) => {
                    return Err(HubError::DecodeFailure {
                        event: target.to_string(),
                        reason: "arguments is not an array".to_string(),
                    })
                }
            };
            HubFrame::Invocation(RawInvocation::new(target, arguments))
        }
        PING => HubFrame::Ping,
        CLOSE => HubFrame::Close {
            error: value.get("error").and_then(Value::as_str).map(str::to_string),
        },
        other => HubFrame::Other(other),
    };
    Ok(frame)
}

fn record(value: &Value) -> String {
    let mut text = value.to_string();
    text.push(RECORD_SEPARATOR);
    text
}

/// Reassembles records from WebSocket text messages.
#[derive(Debug)]
pub struct FrameBuffer {
    partial: String,
    limit: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_RECORD_LEN)
    }
}

impl FrameBuffer {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            partial: String::new(),
            limit,
        }
    }

    /// Append `chunk` and return every record it completed, without separators.
    ///
    /// Fails once the unterminated tail grows past the limit; the link should end.
    pub fn push(&mut self, chunk: &str) -> HubResult<Vec<String>> {
        self.partial.push_str(chunk);
        let mut records = Vec::new();
        while let Some(end) = self.partial.find(RECORD_SEPARATOR) {
            let record: String = self.partial.drain(..end).collect();
            self.partial.drain(..RECORD_SEPARATOR.len_utf8());
            if !record.trim().is_empty() {
                records.push(record);
            }
        }
        if self.partial.len() > self.limit {
            let len = self.partial.len();
            self.partial.clear();
            return Err(HubError::DecodeFailure {
                event: "hub frame".to_string(),
                reason: format!("{len} bytes without a record separator"),
            });
        }
        Ok(records)
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::ChatId;

    #[test]
    fn handshake_request_is_terminated_json() {
        let request = handshake_request();
        assert!(request.ends_with(RECORD_SEPARATOR));
        let body: Value = serde_json::from_str(request.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(body, json!({ "protocol": "json", "version": 1 }));
    }

    #[test]
    fn handshake_response_ok_and_error() {
        assert!(parse_handshake_response("{}").is_ok());
        assert!(matches!(
            parse_handshake_response(r#"{"error":"Requested protocol 'json' is not available."}"#),
            Err(HubError::ConnectFailure(_))
        ));
    }

    #[test]
    fn invocation_has_no_invocation_id() {
        let frame = encode_invocation(&OutboundCall::JoinChat(ChatId(7)));
        let body: Value = serde_json::from_str(frame.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(body, json!({ "type": 1, "target": "JoinChat", "arguments": ["7"] }));
        assert!(body.get("invocationId").is_none());
    }

    #[test]
    fn decodes_frame_kinds() {
        assert_eq!(
            decode_frame(r#"{"type":1,"target":"UserTyping","arguments":[3,"9"]}"#).unwrap(),
            HubFrame::Invocation(RawInvocation::new("UserTyping", vec![json!(3), json!("9")]))
        );
        assert_eq!(decode_frame(r#"{"type":6}"#).unwrap(), HubFrame::Ping);
        assert_eq!(
            decode_frame(r#"{"type":7,"error":"Connection closed with an error."}"#).unwrap(),
            HubFrame::Close {
                error: Some("Connection closed with an error.".to_string())
            }
        );
        assert_eq!(decode_frame(r#"{"type":3,"invocationId":"1"}"#).unwrap(), HubFrame::Other(3));
    }

    #[test]
    fn rejects_frames_without_type_or_target() {
        assert!(decode_frame(r#"{"target":"x"}"#).is_err());
        assert!(decode_frame(r#"{"type":1,"arguments":[]}"#).is_err());
        assert!(decode_frame("not json").is_err());
    }

    #[test]
    fn buffer_splits_and_joins_records() {
        let mut buffer = FrameBuffer::default();
        let records = buffer.push("{\"type\":6}\u{1e}{\"type\":1,").unwrap();
        assert_eq!(records, vec!["{\"type\":6}".to_string()]);
        assert!(buffer.has_partial());

        let records = buffer.push("\"target\":\"A\"}\u{1e}\u{1e}").unwrap();
        assert_eq!(records, vec!["{\"type\":1,\"target\":\"A\"}".to_string()]);
        assert!(!buffer.has_partial());
    }

    #[test]
    fn unterminated_record_over_limit_is_rejected() {
        let mut buffer = FrameBuffer::with_limit(16);
        assert_eq!(buffer.push("{\"type\":6}\u{1e}{\"type\"").unwrap().len(), 1);
        assert!(matches!(
            buffer.push(":1,\"target\":\"Long\""),
            Err(HubError::DecodeFailure { .. })
        ));
        assert!(!buffer.has_partial());
    }
}
