//! Hub services: connection state machine, event dispatch, membership, reconnection
//! and the local conversation store.

pub mod conversation;
pub mod dispatcher;
pub mod hub;
pub mod membership;
pub mod observer;
pub mod reconnect;

pub use conversation::{ChatMessage, Conversation, ConversationState, MessageStatus};
pub use hub::{ChatHub, HubCell, HubInit};
pub use membership::ChatMembership;
pub use observer::{HubObserver, ObserverId, ObserverResult, TracingObserver};
pub use reconnect::ReconnectPolicy;
