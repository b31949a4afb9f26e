//! Entry point: load config, connect to the chat hub, and log events until Ctrl-C.

use chatsync::auth::{user_id_from_token, EnvToken, TokenProvider};
use chatsync::config::HubConfig;
use chatsync::services::{ChatHub, ConversationState, TracingObserver};
use chatsync::WebSocketConnector;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TOKEN_VAR: &str = "HUB_TOKEN";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = HubConfig::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let tokens = EnvToken::new(TOKEN_VAR);
    let current_user = match tokens.token().as_deref().map(user_id_from_token) {
        Some(Ok(user)) => Some(user),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "cannot read user id from token");
            None
        }
        None => None,
    };

    let hub = ChatHub::new(
        WebSocketConnector::from_config(&config),
        tokens,
        config.reconnect_policy(),
    );
    hub.add_observer(Arc::new(TracingObserver));
    let conversation = Arc::new(ConversationState::new(current_user));
    hub.add_observer(conversation.clone());

    let mut failures = hub.subscribe_failures();
    hub.start()?;
    if let Some(chat) = config.open_chat {
        let delivery = conversation.open(&hub, chat, Vec::new());
        tracing::info!(chat_id = %chat, ?delivery, "opened chat");
    }
    tracing::info!(hub_url = %config.hub_url, user = ?current_user, "chat hub client running");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            failure = failures.recv() => match failure {
                Ok(failure) => tracing::error!(attempt = failure.attempt, reason = %failure.reason, "hub connect failed"),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "missed connect failures"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    hub.stop();
    let snapshot = conversation.snapshot();
    tracing::info!(messages = snapshot.messages.len(), "chat hub client stopped");
    Ok(())
}
