//! Socket channel wire format: Socket.IO v4 packets inside Engine.IO v4
//! packets, one per WebSocket text frame.
//!
//! ```text
//! Engine.IO:  <type digit><payload>
//!             0 open · 1 close · 2 ping · 3 pong · 4 message · 5 upgrade · 6 noop
//!
//! Socket.IO (inside a `4` message):
//!             <type digit>[<namespace>,][<ack id>][<json>]
//!             0 CONNECT · 1 DISCONNECT · 2 EVENT · 3 ACK · 4 CONNECT_ERROR
//! ```
//!
//! A `robot command` event therefore arrives as
//! `42["robot command",{"data":"manual-turn-left"}]`.
//!
//! Binary attachments are not supported; such packets decode to a
//! [`RelayError::Protocol`] error and are dropped by the caller.

use rcrelay_types::{RelayError, RobotStatus};
use serde_json::{Map, Value, json};

/// Default namespace.
pub const ROOT_NAMESPACE: &str = "/";

/// Inbound event carrying a raw command string.
pub const EVENT_ROBOT_COMMAND: &str = "robot command";
/// Inbound event carrying a status mapping to rebroadcast.
pub const EVENT_ROBOT_UPDATE: &str = "robot update";
/// Outbound status event.
pub const EVENT_ROBOT_STATUS: &str = "robot status";

// ────────────────────────────────────────────────────────────────────────────
// Engine.IO
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Handshake JSON sent by the server right after the WebSocket opens.
    Open(String),
    Close,
    Ping(String),
    Pong(String),
    /// Carries one Socket.IO packet.
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, RelayError> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| RelayError::Protocol("empty engine packet".to_string()))?;
        let payload = chars.as_str().to_string();
        match kind {
            '0' => Ok(EnginePacket::Open(payload)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(payload)),
            '3' => Ok(EnginePacket::Pong(payload)),
            '4' => Ok(EnginePacket::Message(payload)),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(RelayError::Protocol(format!(
                "unknown engine packet type {other:?}"
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(p) => format!("0{p}"),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(p) => format!("2{p}"),
            EnginePacket::Pong(p) => format!("3{p}"),
            EnginePacket::Message(p) => format!("4{p}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Build the handshake packet for session `sid`.
pub fn open_packet(sid: &str, ping_interval_ms: u64, ping_timeout_ms: u64) -> EnginePacket {
    let handshake = json!({
        "sid": sid,
        "upgrades": [],
        "pingInterval": ping_interval_ms,
        "pingTimeout": ping_timeout_ms,
        "maxPayload": 1_000_000,
    });
    EnginePacket::Open(handshake.to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// Socket.IO
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack: Option<u64>,
        name: String,
        /// First event argument, if any.
        data: Option<Value>,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl SocketPacket {
    pub fn decode(packet: &str) -> Result<Self, RelayError> {
        let mut chars = packet.chars();
        let kind = chars
            .next()
            .ok_or_else(|| RelayError::Protocol("empty socket packet".to_string()))?;
        let rest = chars.as_str();

        let (namespace, rest) = match rest.strip_prefix('/') {
            Some(_) => match rest.split_once(',') {
                Some((ns, tail)) => (ns.to_string(), tail),
                None => (rest.to_string(), ""),
            },
            None => (ROOT_NAMESPACE.to_string(), rest),
        };

        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let ack = if digits > 0 {
            rest[..digits].parse::<u64>().ok()
        } else {
            None
        };
        let body = &rest[digits..];
        let payload = if body.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(body)
                    .map_err(|e| RelayError::Protocol(format!("bad socket payload: {e}")))?,
            )
        };

        match kind {
            '0' => Ok(SocketPacket::Connect {
                namespace,
                data: payload,
            }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => {
                let Some(Value::Array(mut args)) = payload else {
                    return Err(RelayError::Protocol("event payload must be an array".to_string()));
                };
                if args.is_empty() {
                    return Err(RelayError::Protocol("event without a name".to_string()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(RelayError::Protocol(format!("event name must be a string, got {other}")));
                    }
                };
                Ok(SocketPacket::Event {
                    namespace,
                    ack,
                    name,
                    data: args.into_iter().next(),
                })
            }
            '4' => Ok(SocketPacket::ConnectError {
                namespace,
                message: payload
                    .as_ref()
                    .and_then(|p| p.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            other => Err(RelayError::Protocol(format!(
                "unsupported socket packet type {other:?}"
            ))),
        }
    }

    pub fn encode(&self) -> String {
        fn prefix(kind: char, namespace: &str) -> String {
            if namespace == ROOT_NAMESPACE {
                kind.to_string()
            } else {
                format!("{kind}{namespace},")
            }
        }

        match self {
            SocketPacket::Connect { namespace, data } => {
                let mut out = prefix('0', namespace);
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
                out
            }
            SocketPacket::Disconnect { namespace } => prefix('1', namespace),
            SocketPacket::Event {
                namespace,
                ack,
                name,
                data,
            } => {
                let mut out = prefix('2', namespace);
                if let Some(ack) = ack {
                    out.push_str(&ack.to_string());
                }
                let mut args = vec![Value::String(name.clone())];
                args.extend(data.clone());
                out.push_str(&Value::Array(args).to_string());
                out
            }
            SocketPacket::ConnectError { namespace, message } => {
                let mut out = prefix('4', namespace);
                out.push_str(&json!({ "message": message }).to_string());
                out
            }
        }
    }

    /// Wrap in an Engine.IO message and encode as one frame.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Relay events
// ────────────────────────────────────────────────────────────────────────────

/// Inbound socket events the relay acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// `robot command` – `{ data: <raw command string> }`.
    Command(String),
    /// `robot update` – `{ data: <status mapping> }`.
    Update(Map<String, Value>),
}

impl RelayEvent {
    /// Map a decoded event to a relay action.  Unknown names and payloads of
    /// the wrong shape yield `None`.
    pub fn from_event(name: &str, data: Option<&Value>) -> Option<Self> {
        let inner = data?.get("data")?;
        match name {
            EVENT_ROBOT_COMMAND => inner.as_str().map(|s| RelayEvent::Command(s.to_string())),
            EVENT_ROBOT_UPDATE => inner.as_object().cloned().map(RelayEvent::Update),
            _ => None,
        }
    }
}

/// Frame pushing `status` to a client as a `robot status` event.
pub fn robot_status_frame(status: &RobotStatus) -> String {
    SocketPacket::Event {
        namespace: ROOT_NAMESPACE.to_string(),
        ack: None,
        name: EVENT_ROBOT_STATUS.to_string(),
        data: Some(json!({ "data": &status.data })),
    }
    .to_frame()
}
