//! Socket channel: one WebSocket connection speaking Socket.IO v4.
//!
//! Frame interpretation lives in [`SocketClient`], which is pure; the async
//! loop in [`handle_ws`] only moves frames between the socket, the session,
//! and the status bus.

use std::future::pending;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rcrelay_kernel::SessionHandle;
use rcrelay_middleware::EventBus;
use rcrelay_types::{RelayError, RobotStatus};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, interval_at, sleep_until};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::wire::{EnginePacket, ROOT_NAMESPACE, RelayEvent, SocketPacket, open_packet, robot_status_frame};

/// Greeting pushed to a client right after it joins.
pub const GREETING: &str = "server connected";

/// Engine.IO ping cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Time between server pings.
    pub interval: Duration,
    /// How long after a ping the pong may take.
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(25_000),
            timeout: Duration::from_millis(20_000),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame interpretation
// ---------------------------------------------------------------------------

/// What the connection loop must do in response to one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write this text frame back to the client.
    Send(String),
    /// The client joined the root namespace; start forwarding status.
    Joined,
    /// Hand an event to the session.
    Relay(RelayEvent),
    /// A heartbeat reply arrived.
    Pong,
    /// End the connection.
    Close,
}

/// Per-connection protocol state.
#[derive(Debug)]
pub struct SocketClient {
    sid: String,
    joined: bool,
}

impl SocketClient {
    pub fn new(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            joined: false,
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Interpret one text frame.  Undecodable frames yield no actions.
    pub fn on_frame(&mut self, frame: &str) -> Vec<Action> {
        let packet = match EnginePacket::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(sid = %self.sid, error = %e, "dropping engine frame");
                return Vec::new();
            }
        };
        match packet {
            EnginePacket::Ping(probe) => vec![Action::Send(EnginePacket::Pong(probe).encode())],
            EnginePacket::Pong(_) => vec![Action::Pong],
            EnginePacket::Close => vec![Action::Close],
            EnginePacket::Message(inner) => self.on_message(&inner),
            EnginePacket::Open(_) | EnginePacket::Upgrade | EnginePacket::Noop => Vec::new(),
        }
    }

    fn on_message(&mut self, inner: &str) -> Vec<Action> {
        let packet = match SocketPacket::decode(inner) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(sid = %self.sid, error = %e, "dropping socket packet");
                return Vec::new();
            }
        };
        match packet {
            SocketPacket::Connect { namespace, .. } if namespace == ROOT_NAMESPACE => {
                let ack = SocketPacket::Connect {
                    namespace,
                    data: Some(json!({ "sid": self.sid })),
                }
                .to_frame();
                if self.joined {
                    return vec![Action::Send(ack)];
                }
                self.joined = true;
                vec![Action::Send(ack), Action::Joined]
            }
            SocketPacket::Connect { namespace, .. } => {
                warn!(sid = %self.sid, namespace, "connect to unknown namespace");
                vec![Action::Send(
                    SocketPacket::ConnectError {
                        namespace,
                        message: "Invalid namespace".to_string(),
                    }
                    .to_frame(),
                )]
            }
            SocketPacket::Disconnect { namespace } if namespace == ROOT_NAMESPACE => {
                vec![Action::Close]
            }
            SocketPacket::Event {
                namespace, name, data, ..
            } if namespace == ROOT_NAMESPACE && self.joined => {
                match RelayEvent::from_event(&name, data.as_ref()) {
                    Some(event) => vec![Action::Relay(event)],
                    None => {
                        debug!(sid = %self.sid, event = %name, "ignoring event");
                        Vec::new()
                    }
                }
            }
            other => {
                debug!(sid = %self.sid, packet = ?other, "ignoring packet");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

async fn next_status(rx: &mut Option<broadcast::Receiver<RobotStatus>>) -> Result<RobotStatus, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

fn text(frame: String) -> Message {
    Message::Text(frame.into())
}

/// Run one upgraded connection until the client leaves or stops answering
/// pings.
pub(crate) async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    session: SessionHandle,
    bus: EventBus,
    heartbeat: Heartbeat,
) -> Result<(), RelayError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| RelayError::Transport(format!("WS handshake from {peer}: {e}")))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let mut client = SocketClient::new(Uuid::new_v4().simple().to_string());
    info!(%peer, sid = client.sid(), "socket connected");

    let open = open_packet(
        client.sid(),
        heartbeat.interval.as_millis() as u64,
        heartbeat.timeout.as_millis() as u64,
    );
    ws_tx
        .send(text(open.encode()))
        .await
        .map_err(|e| RelayError::Transport(format!("WS write error: {e}")))?;

    let mut status_rx: Option<broadcast::Receiver<RobotStatus>> = None;
    let mut ping = interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let mut outbound = Vec::new();

        tokio::select! {
            _ = ping.tick() => {
                outbound.push(EnginePacket::Ping(String::new()).encode());
                pong_deadline.get_or_insert(Instant::now() + heartbeat.timeout);
            }
            _ = wait_until(pong_deadline) => {
                info!(%peer, sid = client.sid(), "heartbeat timed out");
                break;
            }
            result = next_status(&mut status_rx) => {
                match result {
                    Ok(status) => outbound.push(robot_status_frame(&status)),
                    Err(RecvError::Lagged(n)) => {
                        warn!(%peer, skipped = n, "socket client lagged; statuses dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = ws_rx.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(frame))) => frame,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%peer, error = %e, "socket read error");
                        break;
                    }
                    Some(Ok(_)) => continue,
                };
                let mut close = false;
                for action in client.on_frame(frame.as_str()) {
                    match action {
                        Action::Send(frame) => outbound.push(frame),
                        Action::Joined => {
                            status_rx = Some(bus.subscribe());
                            outbound.push(robot_status_frame(&RobotStatus {
                                data: Value::String(GREETING.to_string()),
                            }));
                        }
                        Action::Relay(RelayEvent::Command(raw)) => session.submit(raw).await?,
                        Action::Relay(RelayEvent::Update(fields)) => session.update_status(fields).await?,
                        Action::Pong => pong_deadline = None,
                        Action::Close => close = true,
                    }
                }
                if close {
                    break;
                }
            }
        }

        for frame in outbound {
            if ws_tx.send(text(frame)).await.is_err() {
                return Ok(());
            }
        }
    }

    info!(%peer, sid = client.sid(), "socket disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined() -> SocketClient {
        let mut client = SocketClient::new("abc");
        client.on_frame("40");
        client
    }

    #[test]
    fn default_heartbeat_matches_engine_io() {
        let hb = Heartbeat::default();
        assert_eq!(hb.interval, Duration::from_secs(25));
        assert_eq!(hb.timeout, Duration::from_secs(20));
    }

    #[test]
    fn connect_is_acknowledged_with_sid() {
        let mut client = SocketClient::new("abc");
        let actions = client.on_frame("40");
        assert_eq!(
            actions,
            vec![Action::Send(r#"40{"sid":"abc"}"#.to_string()), Action::Joined]
        );
        assert!(client.is_joined());

        // A repeated connect is acknowledged but does not re-join.
        assert_eq!(client.on_frame("40"), vec![Action::Send(r#"40{"sid":"abc"}"#.to_string())]);
    }

    #[test]
    fn foreign_namespace_is_refused() {
        let mut client = SocketClient::new("abc");
        let actions = client.on_frame("40/admin,");
        assert_eq!(
            actions,
            vec![Action::Send(r#"44/admin,{"message":"Invalid namespace"}"#.to_string())]
        );
        assert!(!client.is_joined());
    }

    #[test]
    fn robot_events_are_relayed() {
        let mut client = joined();

        let actions = client.on_frame(r#"42["robot command",{"data":"manual-turn-left"}]"#);
        assert_eq!(actions, vec![Action::Relay(RelayEvent::Command("manual-turn-left".into()))]);

        let actions = client.on_frame(r#"42["robot update",{"data":{"faces":1}}]"#);
        let [Action::Relay(RelayEvent::Update(fields))] = actions.as_slice() else {
            panic!("expected update, got {actions:?}");
        };
        assert_eq!(fields["faces"], 1);
    }

    #[test]
    fn events_before_join_are_ignored() {
        let mut client = SocketClient::new("abc");
        assert!(client.on_frame(r#"42["robot command",{"data":"manual-turn-left"}]"#).is_empty());
    }

    #[test]
    fn malformed_and_unknown_frames_are_ignored() {
        let mut client = joined();
        assert!(client.on_frame("").is_empty());
        assert!(client.on_frame("9").is_empty());
        assert!(client.on_frame("42[not json").is_empty());
        assert!(client.on_frame(r#"42["robot dance",{"data":1}]"#).is_empty());
        assert!(client.on_frame(r#"42["robot command",{"data":7}]"#).is_empty());
        assert!(client.on_frame("6").is_empty());
    }

    #[test]
    fn heartbeat_frames() {
        let mut client = joined();
        assert_eq!(client.on_frame("2"), vec![Action::Send("3".to_string())]);
        assert_eq!(client.on_frame("3"), vec![Action::Pong]);
    }

    #[test]
    fn close_and_disconnect_end_the_connection() {
        let mut client = joined();
        assert_eq!(client.on_frame("1"), vec![Action::Close]);
        assert_eq!(client.on_frame("41"), vec![Action::Close]);
    }
}
