//! Hub connection: state machine, connection worker, membership and observer ownership.
//!
//! ```text
//!              start()                 handshake ok
//! Disconnected ───────> Connecting ─────────────────> Connected
//!      ^                   │  ^                          │
//!      │       connect err │  │ retry delay elapsed      │ drop
//!      │                   v  │                          v
//!      │              Disconnected ──> Reconnecting <── Disconnected
//!      │
//!   Stopped <── stop() from any state
//! ```
//!
//! All mutable state sits behind one mutex that is never held across an await or
//! while observers run. Each `start()` bumps an epoch; a worker whose epoch is no
//! longer current discards whatever it was doing, so a `stop()` racing a connect
//! can never resurrect the connection.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::TokenProvider;
use crate::error::{HubError, HubResult};
use crate::models::chat::ChatId;
use crate::models::connection::{ConnectFailure, ConnectionState, Delivery};
use crate::models::event::{InboundEvent, OutboundCall, RawInvocation};
use crate::services::dispatcher::{decode, dispatch};
use crate::services::membership::{ChatMembership, JoinAction};
use crate::services::observer::{HubObserver, ObserverId, ObserverRegistry};
use crate::services::reconnect::ReconnectPolicy;
use crate::transport::{Connector, HubLink};

const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// Handle to the hub connection. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct ChatHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    shared: Mutex<Shared>,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    policy: ReconnectPolicy,
    failures: broadcast::Sender<ConnectFailure>,
}

struct Shared {
    state: ConnectionState,
    epoch: u64,
    /// Credential the current (or last) connection was opened with.
    credential: Option<String>,
    membership: ChatMembership,
    observers: ObserverRegistry,
    outbound: Option<mpsc::UnboundedSender<OutboundCall>>,
    /// A `Connected` event went out without a matching `Disconnected`.
    connected_announced: bool,
    /// `Connected` is being dispatched right now.
    announcing: bool,
    /// A `stop()` landed during that dispatch; its `Disconnected` goes out after.
    deferred_disconnect: bool,
    worker: Option<JoinHandle<()>>,
}

impl Shared {
    /// The worker passes through `Disconnected` between a failure and its retry,
    /// so a live worker counts as started too.
    fn is_started(&self) -> bool {
        self.state.is_active() || self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.outbound.is_some()
    }

    fn send(&self, call: OutboundCall) -> Delivery {
        match (&self.state, &self.outbound) {
            (ConnectionState::Connected, Some(outbound)) => match outbound.send(call) {
                Ok(()) => Delivery::Sent,
                Err(rejected) => {
                    let call = rejected.0;
                    debug!(error = %HubError::SendFailure(call.target()), chat_id = %call.chat_id(), "transport already closed");
                    Delivery::NotConnected
                }
            },
            _ => {
                debug!(
                    error = %HubError::SendFailure(call.target()),
                    chat_id = %call.chat_id(),
                    state = %self.state,
                    "dropping send"
                );
                Delivery::NotConnected
            }
        }
    }
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_connected(&self, epoch: u64, outbound: mpsc::UnboundedSender<OutboundCall>) -> bool {
        let observers = {
            let mut shared = self.lock();
            if shared.epoch != epoch {
                debug!(epoch, "discarding connection from superseded attempt");
                return false;
            }
            shared.state = ConnectionState::Connected;
            let joins = shared.membership.flush();
            for chat in &joins {
                let _ = outbound.send(OutboundCall::JoinChat(*chat));
            }
            shared.outbound = Some(outbound);
            shared.connected_announced = true;
            shared.announcing = true;
            info!(epoch, joined = joins.len(), "hub connected");
            shared.observers.snapshot()
        };
        dispatch(&observers, &InboundEvent::Connected);

        let (current, deferred) = {
            let mut shared = self.lock();
            shared.announcing = false;
            let deferred = std::mem::take(&mut shared.deferred_disconnect)
                .then(|| shared.observers.snapshot());
            (shared.epoch == epoch, deferred)
        };
        if let Some(observers) = deferred {
            dispatch(&observers, &InboundEvent::Disconnected);
        }
        current
    }

    fn deliver(&self, epoch: u64, raw: &RawInvocation) {
        let event = match decode(raw) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "dropping undecodable hub event");
                return;
            }
        };
        let observers = {
            let shared = self.lock();
            if shared.epoch != epoch {
                return;
            }
            shared.observers.snapshot()
        };
        dispatch(&observers, &event);
    }

    fn on_dropped(&self, epoch: u64) -> bool {
        let (observers, announce) = {
            let mut shared = self.lock();
            if shared.epoch != epoch {
                return false;
            }
            shared.state = ConnectionState::Disconnected;
            shared.outbound = None;
            shared.membership.demote();
            let announce = std::mem::take(&mut shared.connected_announced);
            (shared.observers.snapshot(), announce)
        };
        warn!(epoch, "hub connection lost");
        if announce {
            dispatch(&observers, &InboundEvent::Disconnected);
        }
        true
    }

    fn on_connect_failed(&self, epoch: u64, attempt: u32, err: &HubError) -> bool {
        {
            let mut shared = self.lock();
            if shared.epoch != epoch {
                return false;
            }
            shared.state = ConnectionState::Disconnected;
        }
        warn!(epoch, attempt, error = %err, "hub connect failed");
        // No subscribers is fine.
        let _ = self.failures.send(ConnectFailure {
            attempt,
            reason: err.to_string(),
        });
        true
    }

    fn schedule_retry(&self, epoch: u64, failures: u32) -> Option<Duration> {
        let mut shared = self.lock();
        if shared.epoch != epoch {
            return None;
        }
        shared.state = ConnectionState::Reconnecting;
        let delay = self.policy.delay_for(failures.max(1));
        info!(epoch, ?delay, "hub reconnect scheduled");
        Some(delay)
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(worker) = shared.worker.take() {
            worker.abort();
        }
    }
}

/// Connect, deliver until the link ends, wait, repeat. Holds only a weak reference
/// between steps so dropping every [`ChatHub`] ends the loop.
async fn run_worker(hub: Weak<HubInner>, epoch: u64, credential: String) {
    let mut failures: u32 = 0;
    loop {
        let Some(connector) = hub.upgrade().map(|inner| Arc::clone(&inner.connector)) else {
            return;
        };
        debug!(epoch, attempt = failures + 1, "connecting to hub");
        let result = connector.connect(&credential).await;

        match result {
            Ok(HubLink {
                outbound,
                mut inbound,
            }) => {
                let connected = hub
                    .upgrade()
                    .is_some_and(|inner| inner.on_connected(epoch, outbound));
                if !connected {
                    return;
                }
                failures = 0;
                while let Some(raw) = inbound.recv().await {
                    let Some(inner) = hub.upgrade() else {
                        return;
                    };
                    inner.deliver(epoch, &raw);
                }
                if !hub.upgrade().is_some_and(|inner| inner.on_dropped(epoch)) {
                    return;
                }
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                if !hub
                    .upgrade()
                    .is_some_and(|inner| inner.on_connect_failed(epoch, failures, &err))
                {
                    return;
                }
            }
        }

        let Some(delay) = hub
            .upgrade()
            .and_then(|inner| inner.schedule_retry(epoch, failures))
        else {
            return;
        };
        tokio::time::sleep(delay).await;
    }
}

impl ChatHub {
    pub fn new(
        connector: impl Connector,
        tokens: impl TokenProvider + 'static,
        policy: ReconnectPolicy,
    ) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    epoch: 0,
                    credential: None,
                    membership: ChatMembership::new(),
                    observers: ObserverRegistry::new(),
                    outbound: None,
                    connected_announced: false,
                    announcing: false,
                    deferred_disconnect: false,
                    worker: None,
                }),
                connector: Arc::new(connector),
                tokens: Arc::new(tokens),
                policy,
                failures,
            }),
        }
    }

    /// Begin connecting on the current tokio runtime.
    ///
    /// No-op while already connecting or connected. Fails with
    /// [`HubError::Unauthenticated`] when the token provider has nothing, without
    /// attempting a connection or scheduling a retry. Later connect failures are
    /// published through [`ChatHub::subscribe_failures`] and retried.
    pub fn start(&self) -> HubResult<()> {
        let runtime = Handle::try_current().map_err(|_| HubError::Runtime)?;
        let credential = self.inner.tokens.token();

        let mut shared = self.inner.lock();
        if shared.is_started() {
            debug!(state = %shared.state, "hub already started");
            return Ok(());
        }
        let Some(credential) = credential else {
            shared.state = ConnectionState::Disconnected;
            warn!("cannot start hub: no session credential");
            return Err(HubError::Unauthenticated);
        };
        shared.epoch += 1;
        let epoch = shared.epoch;
        shared.state = ConnectionState::Connecting;
        shared.credential = Some(credential.clone());
        shared.worker = Some(runtime.spawn(run_worker(
            Arc::downgrade(&self.inner),
            epoch,
            credential,
        )));
        info!(epoch, "hub starting");
        Ok(())
    }

    /// Shut down from any state. Cancels an in-flight connect or pending retry.
    /// Join intent is kept, so a later `start()` re-joins the same chats.
    ///
    /// Observers get `Disconnected` only if they were told `Connected`. When the
    /// stop lands while `Connected` is still being dispatched (from an observer, or
    /// from another thread), `Disconnected` follows once that dispatch finishes.
    pub fn stop(&self) {
        let (observers, announce) = {
            let mut shared = self.inner.lock();
            if let Some(worker) = shared.worker.take() {
                worker.abort();
            }
            shared.epoch += 1;
            shared.state = ConnectionState::Stopped;
            shared.outbound = None;
            shared.membership.demote();
            let mut announce = std::mem::take(&mut shared.connected_announced);
            if announce && shared.announcing {
                shared.deferred_disconnect = true;
                announce = false;
            }
            (shared.observers.snapshot(), announce)
        };
        info!("hub stopped");
        if announce {
            dispatch(&observers, &InboundEvent::Disconnected);
        }
    }

    /// Restart the connection if the token provider's credential differs from the
    /// one the live connection was opened with. Returns whether a restart happened.
    pub fn refresh_credential(&self) -> HubResult<bool> {
        let current = self.inner.tokens.token();
        let restart = {
            let shared = self.inner.lock();
            shared.is_started() && shared.credential != current
        };
        if !restart {
            return Ok(false);
        }
        info!("session credential changed, restarting hub connection");
        self.stop();
        self.start()?;
        Ok(true)
    }

    /// Join `chat` now if connected, otherwise on the next successful connect.
    pub fn join_chat(&self, chat: ChatId) -> Delivery {
        let mut shared = self.inner.lock();
        let connected = shared.is_connected();
        match shared.membership.request_join(chat, connected) {
            JoinAction::Send => shared.send(OutboundCall::JoinChat(chat)),
            JoinAction::Queued => {
                debug!(chat_id = %chat, state = %shared.state, "join queued until connected");
                Delivery::Queued
            }
            JoinAction::AlreadyJoined => Delivery::AlreadyJoined,
        }
    }

    /// Drop interest in `chat`, telling the hub if connected.
    pub fn leave_chat(&self, chat: ChatId) -> Delivery {
        let mut shared = self.inner.lock();
        shared.membership.leave(chat);
        shared.send(OutboundCall::LeaveChat(chat))
    }

    /// At-most-once: dropped, not queued, when not connected. Callers echo the
    /// message locally and wait for the hub's `ReceiveMessage` as confirmation.
    pub fn send_message(&self, chat: ChatId, text: impl Into<String>) -> Delivery {
        self.inner.lock().send(OutboundCall::SendMessage {
            chat_id: chat,
            text: text.into(),
        })
    }

    pub fn notify_typing(&self, chat: ChatId) -> Delivery {
        self.inner.lock().send(OutboundCall::UserTyping(chat))
    }

    pub fn notify_stopped_typing(&self, chat: ChatId) -> Delivery {
        self.inner.lock().send(OutboundCall::UserStoppedTyping(chat))
    }

    pub fn mark_messages_as_read(&self, chat: ChatId) -> Delivery {
        self.inner.lock().send(OutboundCall::MarkMessagesAsRead(chat))
    }

    /// Observers hold no hub reference implicitly; one that keeps a [`ChatHub`]
    /// clone must be removed before the hub can be freed.
    pub fn add_observer(&self, observer: Arc<dyn HubObserver>) -> ObserverId {
        self.inner.lock().observers.register(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.lock().observers.remove(id)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// Connect failures, one message per failed attempt.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<ConnectFailure> {
        self.inner.failures.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().is_connected()
    }

    /// Chats waiting for the next connect.
    pub fn pending_joins(&self) -> Vec<ChatId> {
        self.inner.lock().membership.pending()
    }

    /// Chats joined on the current connection.
    pub fn active_joins(&self) -> Vec<ChatId> {
        self.inner.lock().membership.active()
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }
}

impl fmt::Debug for ChatHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.lock();
        f.debug_struct("ChatHub")
            .field("state", &shared.state)
            .field("epoch", &shared.epoch)
            .field("membership", &shared.membership)
            .field("observers", &shared.observers.len())
            .finish()
    }
}

/// Result of [`HubCell::get_or_init`].
#[derive(Debug, Clone)]
pub enum HubInit {
    Created(ChatHub),
    Existing(ChatHub),
}

impl HubInit {
    pub fn hub(&self) -> &ChatHub {
        match self {
            HubInit::Created(hub) | HubInit::Existing(hub) => hub,
        }
    }

    pub fn into_hub(self) -> ChatHub {
        match self {
            HubInit::Created(hub) | HubInit::Existing(hub) => hub,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, HubInit::Created(_))
    }
}

/// Owner of the process's single hub. Re-initialization hands back the existing
/// handle; `teardown` stops it and frees the slot (logout).
#[derive(Default)]
pub struct HubCell {
    slot: Mutex<Option<ChatHub>>,
}

impl HubCell {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn get_or_init(&self, init: impl FnOnce() -> ChatHub) -> HubInit {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(hub) => {
                debug!("hub already initialized");
                HubInit::Existing(hub.clone())
            }
            None => {
                let hub = init();
                *slot = Some(hub.clone());
                HubInit::Created(hub)
            }
        }
    }

    pub fn get(&self) -> Option<ChatHub> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop and release the hub. Returns whether there was one.
    pub fn teardown(&self) -> bool {
        let hub = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match hub {
            Some(hub) => {
                hub.stop();
                true
            }
            None => false,
        }
    }
}
