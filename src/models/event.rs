//! Hub event and call models: raw invocations, decoded inbound events, outbound calls.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::chat::{ChatId, UserId};

pub const RECEIVE_MESSAGE: &str = "ReceiveMessage";
pub const USER_STATUS_CHANGED: &str = "UserStatusChanged";
pub const USER_TYPING: &str = "UserTyping";
pub const USER_STOPPED_TYPING: &str = "UserStoppedTyping";
pub const MESSAGES_READ: &str = "MessagesRead";

pub const JOIN_CHAT: &str = "JoinChat";
pub const LEAVE_CHAT: &str = "LeaveChat";
pub const SEND_MESSAGE: &str = "SendMessage";
pub const MARK_MESSAGES_AS_READ: &str = "MarkMessagesAsRead";

/// An invocation pushed by the hub, before decoding: target name plus positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInvocation {
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl RawInvocation {
    pub fn new(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            target: target.into(),
            arguments,
        }
    }
}

/// Chat message as pushed by `ReceiveMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: i64,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub chat_id: ChatId,
    pub content: String,
    /// Server timestamp as sent; see [`MessageDto::sent_at_utc`].
    #[serde(default)]
    pub sent_at: String,
}

impl MessageDto {
    /// Parse `sentAt`. Accepts RFC 3339 and the offset-less ISO form the backend emits
    /// for UTC values (e.g. `2024-05-01T12:00:00.1234567`).
    pub fn sent_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.sent_at.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Decoded hub event delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connected,
    Disconnected,
    MessageReceived(MessageDto),
    UserStatusChanged { user_id: UserId, is_online: bool },
    UserTyping { user_id: UserId, chat_id: ChatId },
    UserStoppedTyping { user_id: UserId, chat_id: ChatId },
    MessagesRead { user_id: UserId, chat_id: ChatId },
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Connected => "Connected",
            InboundEvent::Disconnected => "Disconnected",
            InboundEvent::MessageReceived(_) => RECEIVE_MESSAGE,
            InboundEvent::UserStatusChanged { .. } => USER_STATUS_CHANGED,
            InboundEvent::UserTyping { .. } => USER_TYPING,
            InboundEvent::UserStoppedTyping { .. } => USER_STOPPED_TYPING,
            InboundEvent::MessagesRead { .. } => MESSAGES_READ,
        }
    }

    /// Chat the event concerns, for observers that filter by open chat.
    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            InboundEvent::MessageReceived(message) => Some(message.chat_id),
            InboundEvent::UserTyping { chat_id, .. }
            | InboundEvent::UserStoppedTyping { chat_id, .. }
            | InboundEvent::MessagesRead { chat_id, .. } => Some(*chat_id),
            _ => None,
        }
    }
}

/// Call sent to the hub. Fire-and-forget: the hub never acknowledges these directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCall {
    JoinChat(ChatId),
    LeaveChat(ChatId),
    SendMessage { chat_id: ChatId, text: String },
    UserTyping(ChatId),
    UserStoppedTyping(ChatId),
    MarkMessagesAsRead(ChatId),
}

impl OutboundCall {
    pub fn target(&self) -> &'static str {
        match self {
            OutboundCall::JoinChat(_) => JOIN_CHAT,
            OutboundCall::LeaveChat(_) => LEAVE_CHAT,
            OutboundCall::SendMessage { .. } => SEND_MESSAGE,
            OutboundCall::UserTyping(_) => USER_TYPING,
            OutboundCall::UserStoppedTyping(_) => USER_STOPPED_TYPING,
            OutboundCall::MarkMessagesAsRead(_) => MARK_MESSAGES_AS_READ,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        match self {
            OutboundCall::JoinChat(chat_id)
            | OutboundCall::LeaveChat(chat_id)
            | OutboundCall::UserTyping(chat_id)
            | OutboundCall::UserStoppedTyping(chat_id)
            | OutboundCall::MarkMessagesAsRead(chat_id)
            | OutboundCall::SendMessage { chat_id, .. } => *chat_id,
        }
    }

    /// Positional arguments in the encoding the hub methods expect: membership and
    /// typing calls take the chat id as a string, the others as a number.
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            OutboundCall::JoinChat(chat_id)
            | OutboundCall::LeaveChat(chat_id)
            | OutboundCall::UserTyping(chat_id)
            | OutboundCall::UserStoppedTyping(chat_id) => vec![json!(chat_id.to_string())],
            OutboundCall::SendMessage { chat_id, text } => vec![json!(chat_id.value()), json!(text)],
            OutboundCall::MarkMessagesAsRead(chat_id) => vec![json!(chat_id.value())],
        }
    }
}
