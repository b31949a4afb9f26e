//! Observer interface and registry.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::models::chat::{ChatId, UserId};
use crate::models::event::MessageDto;

/// Result of an observer callback. Errors are logged by the dispatcher and never
/// stop delivery to the remaining observers.
pub type ObserverResult = anyhow::Result<()>;

/// Receives hub events. Every callback defaults to a no-op so observers only
/// implement what they care about.
///
/// Callbacks run synchronously on the hub's delivery task, outside the hub lock, so
/// they may call back into [`crate::ChatHub`]. They must not block; anything bound
/// to a UI thread has to be redispatched by the observer.
pub trait HubObserver: Send + Sync {
    fn on_connected(&self) -> ObserverResult {
        Ok(())
    }

    fn on_disconnected(&self) -> ObserverResult {
        Ok(())
    }

    fn on_message_received(&self, _message: &MessageDto) -> ObserverResult {
        Ok(())
    }

    fn on_user_status_changed(&self, _user_id: UserId, _is_online: bool) -> ObserverResult {
        Ok(())
    }

    fn on_user_typing(&self, _user_id: UserId, _chat_id: ChatId) -> ObserverResult {
        Ok(())
    }

    fn on_user_stopped_typing(&self, _user_id: UserId, _chat_id: ChatId) -> ObserverResult {
        Ok(())
    }

    fn on_messages_read(&self, _user_id: UserId, _chat_id: ChatId) -> ObserverResult {
        Ok(())
    }
}

/// Registration handle returned by [`ObserverRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

pub type ObserverEntry = (ObserverId, Arc<dyn HubObserver>);

/// Registered observers in registration order.
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: u64,
    entries: Vec<ObserverEntry>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn HubObserver>) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.entries.push((id, observer));
        id
    }

    /// Returns whether `id` was registered.
    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Copy of the current list, so dispatch can run without holding the owner's lock.
    pub fn snapshot(&self) -> Vec<ObserverEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Logs every event it sees.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl HubObserver for TracingObserver {
    fn on_connected(&self) -> ObserverResult {
        info!("hub connected");
        Ok(())
    }

    fn on_disconnected(&self) -> ObserverResult {
        info!("hub disconnected");
        Ok(())
    }

    fn on_message_received(&self, message: &MessageDto) -> ObserverResult {
        info!(
            chat_id = %message.chat_id,
            sender_id = %message.sender_id,
            message_id = message.id,
            "message received"
        );
        Ok(())
    }

    fn on_user_status_changed(&self, user_id: UserId, is_online: bool) -> ObserverResult {
        info!(user_id = %user_id, is_online, "user status changed");
        Ok(())
    }

    fn on_user_typing(&self, user_id: UserId, chat_id: ChatId) -> ObserverResult {
        info!(user_id = %user_id, chat_id = %chat_id, "user typing");
        Ok(())
    }

    fn on_user_stopped_typing(&self, user_id: UserId, chat_id: ChatId) -> ObserverResult {
        info!(user_id = %user_id, chat_id = %chat_id, "user stopped typing");
        Ok(())
    }

    fn on_messages_read(&self, user_id: UserId, chat_id: ChatId) -> ObserverResult {
        info!(user_id = %user_id, chat_id = %chat_id, "messages read");
        Ok(())
    }
}
