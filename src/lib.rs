//! Realtime chat synchronization core.
//!
//! Keeps one connection to the chat hub alive, fans hub pushes out to observers,
//! remembers which chats to re-join after a reconnect and paces retries.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod transport;

pub use config::HubConfig;
pub use error::{HubError, HubResult};
pub use models::{ChatId, ConnectFailure, ConnectionState, Delivery, InboundEvent, MessageDto, UserId};
pub use services::{ChatHub, ConversationState, HubCell, HubInit, HubObserver, ReconnectPolicy};
pub use transport::{Connector, HubLink, WebSocketConnector};
