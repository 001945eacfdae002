//! The single WebSocket link of a table session, with bounded reconnects.
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::endpoint::Endpoint;
use crate::core::error::ClientError;
use crate::core::protocol::{encode, ClientAction};
use crate::core::session::RoomCode;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const NORMAL: u16 = 1000;
pub const NO_STATUS: u16 = 1005;
pub const ABNORMAL: u16 = 1006;
pub const POLICY: u16 = 1008;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Delay before the next attempt, or `None` when the link should stay down.
    /// `failures` counts closures since the last successful open, this one included.
    pub fn after_close(&self, code: u16, failures: u32) -> Option<Duration> {
        if code == NORMAL || code == POLICY {
            return None;
        }
        match self.max_attempts {
            Some(max) if failures > max => None,
            _ => Some(self.delay),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Reconnecting { attempt: u32, code: u16 },
    Disconnected { code: u16 },
}

impl LinkState {
    pub fn is_open(&self) -> bool {
        matches!(self, LinkState::Open)
    }

    /// Connected, or about to be
    pub fn is_pending(&self) -> bool {
        matches!(self, LinkState::Connecting | LinkState::Open | LinkState::Reconnecting { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    State(LinkState),
    Frame(String),
}

#[derive(Debug)]
enum Outbound {
    Action(String),
    Close,
}

enum Closed {
    Local,
    Remote(u16),
}

struct Link {
    room: RoomCode,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Receiver<LinkState>,
    task: JoinHandle<()>,
}

/// Owns at most one link. Link states and text frames arrive on the receiver
/// returned by [`ConnectionManager::new`].
pub struct ConnectionManager {
    endpoint: Endpoint,
    policy: ReconnectPolicy,
    events: mpsc::Sender<LinkEvent>,
    link: Option<Link>,
}

impl ConnectionManager {
    pub fn new(endpoint: Endpoint, policy: ReconnectPolicy) -> (Self, mpsc::Receiver<LinkEvent>) {
        let (events, rx) = mpsc::channel(64);
        (Self { endpoint, policy, events, link: None }, rx)
    }

    /// Opens a link to `room`. Returns `false` when one is already connecting,
    /// open or waiting to reconnect for that room.
    pub fn connect(&mut self, room: &RoomCode) -> bool {
        if let Some(link) = &self.link {
            if link.room == *room && link.state.borrow().is_pending() {
                debug!(room = %room, "connect ignored, link already pending");
                return false;
            }
        }
        if let Some(old) = self.link.take() {
            old.task.abort();
        }

        let url = self.endpoint.url_for(room);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(LinkState::Connecting);
        let events = self.events.clone();
        let task = tokio::spawn(run_link(url, self.policy, outbound_rx, events, state_tx));
        info!(room = %room, "link started");
        self.link = Some(Link { room: room.clone(), outbound, state, task });
        true
    }

    pub fn state(&self) -> LinkState {
        self.link.as_ref().map_or(LinkState::Idle, |link| *link.state.borrow())
    }

    pub fn is_live(&self) -> bool {
        self.state().is_open()
    }

    pub fn send(&self, action: ClientAction) -> Result<(), ClientError> {
        let link = self.link.as_ref().ok_or(ClientError::Disconnected)?;
        if !link.state.borrow().is_open() {
            return Err(ClientError::Disconnected);
        }
        let text = encode(&action)?;
        link.outbound.send(Outbound::Action(text)).map_err(|_| ClientError::Disconnected)
    }

    /// Sends a normal close; the link will not reconnect
    pub fn close(&self) {
        if let Some(link) = &self.link {
            let _ = link.outbound.send(Outbound::Close);
        }
    }

    /// Closes and waits briefly for the close frame to go out
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(link) = self.link.take() {
            let mut task = link.task;
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }
}

async fn run_link(
    url: Url,
    policy: ReconnectPolicy,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::Sender<LinkEvent>,
    state: watch::Sender<LinkState>,
) {
    let publish = |next: LinkState| {
        let events = events.clone();
        let changed = *state.borrow() != next;
        state.send_replace(next);
        async move {
            if changed {
                let _ = events.send(LinkEvent::State(next)).await;
            }
        }
    };

    let mut failures = 0u32;
    let _ = events.send(LinkEvent::State(LinkState::Connecting)).await;

    loop {
        let closed = tokio::select! {
            attempt = connect_async(url.as_str()) => match attempt {
                Ok((ws, _)) => {
                    failures = 0;
                    info!(url = %url, "link open");
                    publish(LinkState::Open).await;
                    pump(ws, &mut outbound, &events).await
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "connect failed");
                    Closed::Remote(ABNORMAL)
                }
            },
            msg = next_close(&mut outbound) => {
                debug!(?msg, "closed while connecting");
                Closed::Local
            }
        };

        let code = match closed {
            Closed::Local => {
                publish(LinkState::Disconnected { code: NORMAL }).await;
                return;
            }
            Closed::Remote(code) => code,
        };

        failures += 1;
        let Some(delay) = policy.after_close(code, failures) else {
            info!(code, failures, "link down for good");
            publish(LinkState::Disconnected { code }).await;
            return;
        };

        info!(code, attempt = failures, ?delay, "reconnect scheduled");
        publish(LinkState::Reconnecting { attempt: failures, code }).await;
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = next_close(&mut outbound) => {
                publish(LinkState::Disconnected { code: NORMAL }).await;
                return;
            }
        }
    }
}

/// Resolves once a close is requested. Actions queued while the link is down are dropped.
async fn next_close(outbound: &mut mpsc::UnboundedReceiver<Outbound>) -> Option<Outbound> {
    loop {
        match outbound.recv().await {
            Some(Outbound::Action(text)) => warn!(%text, "dropping action, link is down"),
            other => return other,
        }
    }
}

async fn pump(
    ws: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::Sender<LinkEvent>,
) -> Closed {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if events.send(LinkEvent::Frame(text)).await.is_err() {
                        let _ = sink.send(close_frame()).await;
                        return Closed::Local;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map_or(NO_STATUS, |f| u16::from(f.code));
                    info!(code, "server closed the link");
                    return Closed::Remote(code);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "link error");
                    return Closed::Remote(ABNORMAL);
                }
                None => return Closed::Remote(ABNORMAL),
            },
            msg = outbound.recv() => match msg {
                Some(Outbound::Action(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!(error = %e, "send failed");
                        return Closed::Remote(ABNORMAL);
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(close_frame()).await;
                    let _ = sink.close().await;
                    return Closed::Local;
                }
            },
        }
    }
}

fn close_frame() -> Message {
    Message::Close(Some(CloseFrame { code: CloseCode::Normal, reason: "".into() }))
}
