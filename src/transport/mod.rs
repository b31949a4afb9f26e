//! Hub transport: the seam between the connection state machine and the network.

pub mod protocol;
pub mod ws;

pub use ws::WebSocketConnector;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::HubResult;
use crate::models::event::{OutboundCall, RawInvocation};

/// A live hub connection as seen by the state machine.
///
/// Calls pushed into `outbound` are written in order. `inbound` yields hub
/// invocations until the connection ends, at which point it returns `None`.
/// Dropping `outbound` asks the transport to close.
pub struct HubLink {
    pub outbound: mpsc::UnboundedSender<OutboundCall>,
    pub inbound: mpsc::UnboundedReceiver<RawInvocation>,
}

impl HubLink {
    /// Create a link plus the transport-side ends.
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<OutboundCall>,
        mpsc::UnboundedSender<RawInvocation>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            outbound_rx,
            inbound_tx,
        )
    }
}

/// Opens hub connections. One call per connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and complete the hub handshake using `credential` as bearer token.
    async fn connect(&self, credential: &str) -> HubResult<HubLink>;
}
