//! Local conversation state for the open chat, kept current by hub events.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{HubError, HubResult};
use crate::models::chat::{ChatId, UserId};
use crate::models::connection::Delivery;
use crate::models::event::MessageDto;
use crate::services::hub::ChatHub;
use crate::services::observer::{HubObserver, ObserverResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Sent, waiting for the hub to echo it back.
    Pending,
    Confirmed,
    /// The hub was not connected; the message never left.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub local_id: Uuid,
    pub server_id: Option<i64>,
    pub sender_id: Option<UserId>,
    pub sender_name: Option<String>,
    pub chat_id: ChatId,
    pub content: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub status: MessageStatus,
}

impl ChatMessage {
    fn confirmed(message: &MessageDto) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            server_id: Some(message.id),
            sender_id: Some(message.sender_id),
            sender_name: message.sender_name.clone(),
            chat_id: message.chat_id,
            content: message.content.clone(),
            sent_at: message.sent_at_utc(),
            status: MessageStatus::Confirmed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Conversation {
    pub current_chat: Option<ChatId>,
    pub messages: Vec<ChatMessage>,
    pub presence: HashMap<UserId, bool>,
    pub typing: BTreeSet<UserId>,
    /// Users who read the open chat since it was opened.
    pub read_by: BTreeSet<UserId>,
    pub connected: bool,
    pub last_error: Option<String>,
}

/// Observer holding the open chat's messages plus presence and typing sets.
///
/// Register it with [`ChatHub::add_observer`]; drive the chat through
/// [`ConversationState::open`], [`ConversationState::send`] and
/// [`ConversationState::close`].
#[derive(Debug, Default)]
pub struct ConversationState {
    current_user: Option<UserId>,
    inner: Mutex<Conversation>,
}

impl ConversationState {
    /// `current_user` identifies own messages and typing; `None` treats every sender as remote.
    pub fn new(current_user: Option<UserId>) -> Self {
        Self {
            current_user,
            inner: Mutex::new(Conversation::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Conversation> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.current_user
    }

    /// Make `chat` the open chat seeded with `history`, join it and mark it read.
    pub fn open(&self, hub: &ChatHub, chat: ChatId, history: Vec<MessageDto>) -> Delivery {
        {
            let mut state = self.lock();
            state.current_chat = Some(chat);
            state.messages = history.iter().map(ChatMessage::confirmed).collect();
            state.typing.clear();
            state.read_by.clear();
        }
        let joined = hub.join_chat(chat);
        hub.mark_messages_as_read(chat);
        joined
    }

    /// Leave the open chat, if any.
    pub fn close(&self, hub: &ChatHub) -> Option<Delivery> {
        let chat = {
            let mut state = self.lock();
            state.typing.clear();
            state.read_by.clear();
            state.current_chat.take()
        }?;
        Some(hub.leave_chat(chat))
    }

    /// Send `text` to the open chat and echo it locally right away.
    pub fn send(&self, hub: &ChatHub, text: &str) -> HubResult<Uuid> {
        let text = text.trim();
        if text.is_empty() {
            return Err(HubError::Validation("message text is empty".to_string()));
        }
        let local_id = Uuid::new_v4();
        // The echo can arrive on the delivery task before `send_message` returns,
        // so the pending entry has to exist first.
        let chat = {
            let mut state = self.lock();
            let chat = state
                .current_chat
                .ok_or_else(|| HubError::Validation("no chat is open".to_string()))?;
            state.messages.push(ChatMessage {
                local_id,
                server_id: None,
                sender_id: self.current_user,
                sender_name: None,
                chat_id: chat,
                content: text.to_string(),
                sent_at: None,
                status: MessageStatus::Pending,
            });
            chat
        };

        if hub.send_message(chat, text) == Delivery::NotConnected {
            let mut state = self.lock();
            state.last_error = Some("message not sent: hub is not connected".to_string());
            if let Some(message) = state.messages.iter_mut().find(|m| m.local_id == local_id) {
                message.status = MessageStatus::Failed;
            }
        }
        Ok(local_id)
    }

    /// Tell the open chat whether the current user is typing.
    pub fn set_typing(&self, hub: &ChatHub, typing: bool) -> Delivery {
        match self.lock().current_chat {
            Some(chat) if typing => hub.notify_typing(chat),
            Some(chat) => hub.notify_stopped_typing(chat),
            None => Delivery::NotConnected,
        }
    }

    pub fn snapshot(&self) -> Conversation {
        self.lock().clone()
    }

    fn is_self(&self, user: UserId) -> bool {
        self.current_user == Some(user)
    }
}

impl HubObserver for ConversationState {
    fn on_connected(&self) -> ObserverResult {
        let mut state = self.lock();
        state.connected = true;
        state.last_error = None;
        Ok(())
    }

    fn on_disconnected(&self) -> ObserverResult {
        let mut state = self.lock();
        state.connected = false;
        state.typing.clear();
        state.last_error = Some("connection to chat hub lost".to_string());
        Ok(())
    }

    fn on_message_received(&self, message: &MessageDto) -> ObserverResult {
        let mut state = self.lock();
        if state.current_chat != Some(message.chat_id) {
            return Ok(());
        }
        state.typing.remove(&message.sender_id);

        if self.is_self(message.sender_id) {
            let echo = state.messages.iter_mut().find(|m| {
                m.status == MessageStatus::Pending && m.content == message.content
            });
            if let Some(pending) = echo {
                pending.server_id = Some(message.id);
                pending.sent_at = message.sent_at_utc();
                pending.sender_name = message.sender_name.clone();
                pending.status = MessageStatus::Confirmed;
                debug!(local_id = %pending.local_id, server_id = message.id, "message confirmed");
                return Ok(());
            }
        }
        if state
            .messages
            .iter()
            .any(|m| m.server_id == Some(message.id))
        {
            return Ok(());
        }
        state.messages.push(ChatMessage::confirmed(message));
        Ok(())
    }

    fn on_user_status_changed(&self, user_id: UserId, is_online: bool) -> ObserverResult {
        let mut state = self.lock();
        state.presence.insert(user_id, is_online);
        if !is_online {
            state.typing.remove(&user_id);
        }
        Ok(())
    }

    fn on_user_typing(&self, user_id: UserId, chat_id: ChatId) -> ObserverResult {
        let mut state = self.lock();
        if state.current_chat == Some(chat_id) && !self.is_self(user_id) {
            state.typing.insert(user_id);
        }
        Ok(())
    }

    fn on_user_stopped_typing(&self, user_id: UserId, chat_id: ChatId) -> ObserverResult {
        let mut state = self.lock();
        if state.current_chat == Some(chat_id) {
            state.typing.remove(&user_id);
        }
        Ok(())
    }

    fn on_messages_read(&self, user_id: UserId, chat_id: ChatId) -> ObserverResult {
        let mut state = self.lock();
        if state.current_chat == Some(chat_id) && !self.is_self(user_id) {
            state.read_by.insert(user_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::services::reconnect::ReconnectPolicy;
    use crate::transport::{Connector, HubLink};
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl Connector for Offline {
        async fn connect(&self, _credential: &str) -> HubResult<HubLink> {
            Err(HubError::ConnectFailure("offline".to_string()))
        }
    }

    fn offline_hub() -> ChatHub {
        ChatHub::new(Offline, StaticToken::new("t"), ReconnectPolicy::default())
    }

    fn message(id: i64, sender: i64, chat: i64, content: &str) -> MessageDto {
        MessageDto {
            id,
            sender_id: UserId(sender),
            sender_name: Some(format!("user {sender}")),
            chat_id: ChatId(chat),
            content: content.to_string(),
            sent_at: "2024-05-01T12:00:00Z".to_string(),
        }
    }

    #[test]
    fn open_seeds_history_and_queues_join() {
        let hub = offline_hub();
        let state = ConversationState::new(Some(UserId(1)));
        let delivery = state.open(&hub, ChatId(42), vec![message(10, 2, 42, "hello")]);
        assert_eq!(delivery, Delivery::Queued);
        assert_eq!(hub.pending_joins(), vec![ChatId(42)]);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.current_chat, Some(ChatId(42)));
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].status, MessageStatus::Confirmed);
    }

    #[test]
    fn filters_events_for_other_chats() {
        let hub = offline_hub();
        let state = ConversationState::new(Some(UserId(1)));
        state.open(&hub, ChatId(42), Vec::new());

        state.on_message_received(&message(11, 2, 7, "elsewhere")).unwrap();
        state.on_user_typing(UserId(2), ChatId(7)).unwrap();
        state.on_message_received(&message(12, 2, 42, "here")).unwrap();
        state.on_user_typing(UserId(3), ChatId(42)).unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].content, "here");
        assert_eq!(snapshot.typing, BTreeSet::from([UserId(3)]));
    }

    #[test]
    fn own_echo_confirms_pending_message() {
        let hub = offline_hub();
        let state = ConversationState::new(Some(UserId(1)));
        state.open(&hub, ChatId(42), Vec::new());
        // Force a pending entry as if the send had gone out.
        state.lock().messages.push(ChatMessage {
            local_id: Uuid::new_v4(),
            server_id: None,
            sender_id: Some(UserId(1)),
            sender_name: None,
            chat_id: ChatId(42),
            content: "hi".to_string(),
            sent_at: None,
            status: MessageStatus::Pending,
        });

        state.on_message_received(&message(99, 1, 42, "hi")).unwrap();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].server_id, Some(99));
        assert_eq!(snapshot.messages[0].status, MessageStatus::Confirmed);
        assert!(snapshot.messages[0].sent_at.is_some());

        // A replayed delivery of the same server message is not duplicated.
        state.on_message_received(&message(99, 1, 42, "hi")).unwrap();
        assert_eq!(state.snapshot().messages.len(), 1);
    }

    #[test]
    fn send_while_offline_marks_failed() {
        let hub = offline_hub();
        let state = ConversationState::new(Some(UserId(1)));
        state.open(&hub, ChatId(42), Vec::new());
        state.send(&hub, "  hello ").unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.messages[0].content, "hello");
        assert_eq!(snapshot.messages[0].status, MessageStatus::Failed);
        assert!(snapshot.last_error.is_some());
    }

    #[test]
    fn send_rejects_blank_text_and_missing_chat() {
        let hub = offline_hub();
        let state = ConversationState::new(None);
        assert!(matches!(state.send(&hub, "hi"), Err(HubError::Validation(_))));
        state.open(&hub, ChatId(1), Vec::new());
        assert!(matches!(state.send(&hub, "   "), Err(HubError::Validation(_))));
    }

    #[test]
    fn own_typing_and_reads_are_ignored() {
        let hub = offline_hub();
        let state = ConversationState::new(Some(UserId(1)));
        state.open(&hub, ChatId(5), Vec::new());
        state.on_user_typing(UserId(1), ChatId(5)).unwrap();
        state.on_messages_read(UserId(1), ChatId(5)).unwrap();
        state.on_messages_read(UserId(2), ChatId(5)).unwrap();
        let snapshot = state.snapshot();
        assert!(snapshot.typing.is_empty());
        assert_eq!(snapshot.read_by, BTreeSet::from([UserId(2)]));
    }

    #[test]
    fn presence_and_disconnect() {
        let state = ConversationState::new(None);
        state.on_connected().unwrap();
        state.on_user_status_changed(UserId(3), true).unwrap();
        state.on_user_status_changed(UserId(4), false).unwrap();
        state.on_disconnected().unwrap();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.presence.get(&UserId(3)), Some(&true));
        assert_eq!(snapshot.presence.get(&UserId(4)), Some(&false));
        assert!(!snapshot.connected);
        assert!(snapshot.last_error.is_some());
    }

    #[test]
    fn close_leaves_open_chat() {
        let hub = offline_hub();
        let state = ConversationState::new(None);
        assert_eq!(state.close(&hub), None);
        state.open(&hub, ChatId(8), Vec::new());
        assert_eq!(state.close(&hub), Some(Delivery::NotConnected));
        assert!(hub.pending_joins().is_empty());
        assert_eq!(state.snapshot().current_chat, None);
    }
}
