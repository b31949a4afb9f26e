//! Chat membership tracking: which chats the client wants joined, and which joins
//! went out on the current connection.
//!
//! The hub forgets membership when a socket drops, so intent is kept here and
//! re-asserted after every reconnect.

use std::collections::BTreeSet;

use crate::models::chat::ChatId;

/// Outcome of [`ChatMembership::request_join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAction {
    /// Send `JoinChat` now.
    Send,
    /// Held until the next connect.
    Queued,
    /// Already joined on this connection; nothing to send.
    AlreadyJoined,
}

/// Pending-join and active-join sets. Disjoint at all times.
#[derive(Debug, Default, Clone)]
pub struct ChatMembership {
    pending: BTreeSet<ChatId>,
    active: BTreeSet<ChatId>,
}

impl ChatMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record interest in `chat`. `connected` is the hub state at the time of the call.
    pub fn request_join(&mut self, chat: ChatId, connected: bool) -> JoinAction {
        if !connected {
            self.pending.insert(chat);
            return JoinAction::Queued;
        }
        if self.active.contains(&chat) {
            return JoinAction::AlreadyJoined;
        }
        self.pending.remove(&chat);
        self.active.insert(chat);
        JoinAction::Send
    }

    /// Forget `chat` entirely. Returns whether it was known.
    pub fn leave(&mut self, chat: ChatId) -> bool {
        let was_pending = self.pending.remove(&chat);
        let was_active = self.active.remove(&chat);
        was_pending || was_active
    }

    /// Move every pending chat to active and return them, one join each.
    pub fn flush(&mut self) -> Vec<ChatId> {
        let flushed: Vec<ChatId> = std::mem::take(&mut self.pending).into_iter().collect();
        self.active.extend(flushed.iter().copied());
        flushed
    }

    /// Connection lost: every active join must be replayed.
    pub fn demote(&mut self) {
        let active = std::mem::take(&mut self.active);
        self.pending.extend(active);
    }

    pub fn is_member(&self, chat: ChatId) -> bool {
        self.pending.contains(&chat) || self.active.contains(&chat)
    }

    pub fn pending(&self) -> Vec<ChatId> {
        self.pending.iter().copied().collect()
    }

    pub fn active(&self) -> Vec<ChatId> {
        self.active.iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_joins_while_disconnected_flush_once() {
        let mut membership = ChatMembership::new();
        assert_eq!(membership.request_join(ChatId(3), false), JoinAction::Queued);
        assert_eq!(membership.request_join(ChatId(3), false), JoinAction::Queued);
        assert_eq!(membership.request_join(ChatId(1), false), JoinAction::Queued);

        assert_eq!(membership.flush(), vec![ChatId(1), ChatId(3)]);
        assert!(membership.flush().is_empty());
        assert_eq!(membership.active(), vec![ChatId(1), ChatId(3)]);
    }

    #[test]
    fn join_then_leave_before_connect_leaves_nothing() {
        let mut membership = ChatMembership::new();
        membership.request_join(ChatId(7), false);
        assert!(membership.leave(ChatId(7)));
        assert!(membership.flush().is_empty());
        assert!(membership.is_empty());
    }

    #[test]
    fn connected_join_is_sent_once() {
        let mut membership = ChatMembership::new();
        assert_eq!(membership.request_join(ChatId(2), true), JoinAction::Send);
        assert_eq!(membership.request_join(ChatId(2), true), JoinAction::AlreadyJoined);
        assert!(membership.pending().is_empty());
    }

    #[test]
    fn demote_replays_active_joins() {
        let mut membership = ChatMembership::new();
        membership.request_join(ChatId(2), true);
        membership.request_join(ChatId(5), false);
        membership.demote();
        assert!(membership.active().is_empty());
        assert_eq!(membership.flush(), vec![ChatId(2), ChatId(5)]);
    }

    #[test]
    fn leave_unknown_chat_reports_false() {
        let mut membership = ChatMembership::new();
        assert!(!membership.leave(ChatId(9)));
        assert!(!membership.is_member(ChatId(9)));
    }
}
