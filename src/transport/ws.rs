//! WebSocket connector: hub handshake, then one writer task and one reader task per link.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::protocol::{self, FrameBuffer, HubFrame};
use super::{Connector, HubLink};
use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::models::event::{OutboundCall, RawInvocation};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connects straight to the hub over WebSocket, skipping HTTP negotiation.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    hub_url: String,
    handshake_timeout: Duration,
    keep_alive: Duration,
    server_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(hub_url: impl Into<String>) -> Self {
        let defaults = HubConfig::default();
        Self {
            hub_url: hub_url.into(),
            handshake_timeout: defaults.handshake_timeout(),
            keep_alive: defaults.keep_alive_interval(),
            server_timeout: defaults.server_timeout(),
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        Self {
            hub_url: config.hub_url.clone(),
            handshake_timeout: config.handshake_timeout(),
            keep_alive: config.keep_alive_interval(),
            server_timeout: config.server_timeout(),
        }
    }

    async fn open(&self, credential: &str) -> HubResult<(WsSink, WsSource, FrameBuffer, Vec<String>)> {
        let url = endpoint_url(&self.hub_url, credential)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| HubError::ConnectFailure(format!("bad hub url: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|_| HubError::ConnectFailure("credential is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| HubError::ConnectFailure(format!("websocket connect failed: {e}")))?;
        let (mut sink, mut source) = ws.split();

        sink.send(Message::Text(protocol::handshake_request()))
            .await
            .map_err(|e| HubError::ConnectFailure(format!("handshake send failed: {e}")))?;

        let mut buffer = FrameBuffer::default();
        let mut records = Vec::new();
        while records.is_empty() {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    records = buffer
                        .push(&text)
                        .map_err(|e| HubError::ConnectFailure(format!("bad handshake response: {e}")))?
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(HubError::ConnectFailure(format!(
                        "hub closed during handshake: {frame:?}"
                    )))
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(HubError::ConnectFailure(format!("handshake read failed: {e}"))),
                None => return Err(HubError::ConnectFailure("hub closed during handshake".to_string())),
            }
        }
        protocol::parse_handshake_response(&records.remove(0))?;
        Ok((sink, source, buffer, records))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, credential: &str) -> HubResult<HubLink> {
        let (sink, source, buffer, leftover) = timeout(self.handshake_timeout, self.open(credential))
            .await
            .map_err(|_| {
                HubError::ConnectFailure(format!("handshake timed out after {:?}", self.handshake_timeout))
            })??;
        info!(hub_url = %self.hub_url, "hub handshake complete");

        let (link, outbound_rx, inbound_tx) = HubLink::pair();
        let (writer_alive, writer_gone) = oneshot::channel();
        tokio::spawn(write_loop(sink, outbound_rx, self.keep_alive, writer_alive));
        tokio::spawn(read_loop(
            source,
            inbound_tx,
            buffer,
            leftover,
            self.server_timeout,
            writer_gone,
        ));
        Ok(link)
    }
}

/// Hub URL with a WebSocket scheme and the `access_token` query parameter.
pub(crate) fn endpoint_url(hub_url: &str, credential: &str) -> HubResult<String> {
    let hub_url = hub_url.trim();
    let url = if let Some(rest) = hub_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = hub_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if hub_url.starts_with("wss://") || hub_url.starts_with("ws://") {
        hub_url.to_string()
    } else {
        return Err(HubError::Config(format!("unsupported hub url scheme: {hub_url}")));
    };
    let joiner = if url.contains('?') { '&' } else { '?' };
    Ok(format!(
        "{url}{joiner}access_token={}",
        urlencoding::encode(credential)
    ))
}

/// Writes calls and keep-alive pings. `_alive` is dropped on exit, which ends the reader.
async fn write_loop<K>(
    mut sink: K,
    mut outbound: mpsc::UnboundedReceiver<OutboundCall>,
    keep_alive: Duration,
    _alive: oneshot::Sender<()>,
) where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    let mut ticker = tokio::time::interval(keep_alive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        let frame = tokio::select! {
            call = outbound.recv() => match call {
                Some(call) => {
                    trace!(method = call.target(), chat_id = %call.chat_id(), "hub send");
                    protocol::encode_invocation(&call)
                }
                None => break,
            },
            _ = ticker.tick() => protocol::encode_ping(),
        };
        if let Err(e) = sink.send(Message::Text(frame)).await {
            warn!(error = %e, "hub write failed");
            return;
        }
    }

    debug!("hub link released, closing");
    let _ = sink.send(Message::Text(protocol::encode_close())).await;
    let _ = sink.close().await;
}

async fn read_loop<S>(
    mut source: S,
    inbound: mpsc::UnboundedSender<RawInvocation>,
    mut buffer: FrameBuffer,
    leftover: Vec<String>,
    server_timeout: Duration,
    mut writer_gone: oneshot::Receiver<()>,
) where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    if !forward_records(leftover, &inbound) {
        return;
    }
    loop {
        let next = tokio::select! {
            _ = inbound.closed() => break,
            _ = &mut writer_gone => {
                debug!("hub writer ended");
                break;
            }
            next = timeout(server_timeout, source.next()) => next,
        };
        let text = match next {
            Err(_) => {
                warn!(?server_timeout, "no traffic from hub within server timeout");
                break;
            }
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Close(frame)))) => {
                info!(?frame, "hub closed websocket");
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => {
                warn!(error = %e, "hub read failed");
                break;
            }
            Ok(None) => break,
        };
        let records = match buffer.push(&text) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "hub record too long");
                break;
            }
        };
        if !forward_records(records, &inbound) {
            break;
        }
    }
    debug!("hub reader finished");
}

/// Forward decoded invocations. Returns false when the link should end.
fn forward_records(records: Vec<String>, inbound: &mpsc::UnboundedSender<RawInvocation>) -> bool {
    for record in records {
        match protocol::decode_frame(&record) {
            Ok(HubFrame::Invocation(raw)) => {
                if inbound.send(raw).is_err() {
                    return false;
                }
            }
            Ok(HubFrame::Ping) => trace!("hub ping"),
            Ok(HubFrame::Close { error }) => {
                info!(error = ?error, "hub sent close");
                return false;
            }
            Ok(HubFrame::Other(kind)) => trace!(kind, "ignoring hub frame"),
            Err(e) => warn!(error = %e, "dropping malformed hub frame"),
        }
    }
    true
}
