//! Data models for chats, hub events, and connection status.

pub mod chat;
pub mod connection;
pub mod event;

pub use chat::*;
pub use connection::*;
pub use event::*;
