//! Socket.IO wire codec
//!
//! Encodes and decodes the text frames of Socket.IO v5 carried over the
//! Engine.IO v4 WebSocket transport. A frame is one Engine.IO packet whose
//! first character is the packet type; `4` (message) wraps a Socket.IO
//! packet with its own type digit, optional namespace, optional ack id and
//! JSON payload:
//!
//! ```text
//! 0{"sid":"...","pingInterval":25000,"pingTimeout":20000}   open
//! 2 / 3                                                     ping / pong
//! 40{"token":"Bearer ..."}                                  connect
//! 44{"message":"Authentication error"}                      connect error
//! 421["sendMessage",{...}]                                  event with ack 1
//! 431[{"status":"ok"}]                                      ack 1
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for frame decoding
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown packet type: {0}")]
    UnknownPacket(char),

    #[error("Binary packets are not supported")]
    Binary,

    #[error("Malformed packet: {0}")]
    Malformed(&'static str),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine.IO open handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

// =============================================================================
// Engine.IO
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(handshake) => format!(
                "0{}",
                serde_json::to_value(handshake).unwrap_or(Value::Null)
            ),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(packet) => format!("4{}", packet.encode()),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

// =============================================================================
// Socket.IO
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        ack: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

impl SocketPacket {
    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(payload)) => format!("0{}", payload),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { ack, name, args } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                let ack = ack.map(|id| id.to_string()).unwrap_or_default();
                format!("2{}{}", ack, Value::Array(items))
            }
            SocketPacket::Ack { id, args } => format!("3{}{}", id, Value::Array(args.clone())),
            SocketPacket::ConnectError(payload) => format!("4{}", payload),
        }
    }
}

/// Decode one text frame
pub fn decode(frame: &str) -> Result<EnginePacket, WireError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(WireError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping(rest.to_string())),
        '3' => Ok(EnginePacket::Pong(rest.to_string())),
        '4' => Ok(EnginePacket::Message(decode_socket(rest)?)),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(WireError::UnknownPacket(other)),
    }
}

fn decode_socket(body: &str) -> Result<SocketPacket, WireError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(WireError::Empty)?;
    let mut rest = chars.as_str();

    // Non-default namespaces are prefixed as "/name,"
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let (ack_digits, payload) = rest.split_at(digits);
    let ack = if ack_digits.is_empty() {
        None
    } else {
        Some(
            ack_digits
                .parse::<u64>()
                .map_err(|_| WireError::Malformed("ack id out of range"))?,
        )
    };

    match kind {
        '0' => Ok(SocketPacket::Connect(parse_optional(payload)?)),
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let mut args = parse_array(payload)?;
            if args.is_empty() {
                return Err(WireError::Malformed("event without a name"));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                _ => return Err(WireError::Malformed("event name is not a string")),
            };
            Ok(SocketPacket::Event { ack, name, args })
        }
        '3' => Ok(SocketPacket::Ack {
            id: ack.ok_or(WireError::Malformed("ack without an id"))?,
            args: parse_array(payload)?,
        }),
        '4' => Ok(SocketPacket::ConnectError(
            parse_optional(payload)?.unwrap_or(Value::Null),
        )),
        '5' | '6' => Err(WireError::Binary),
        other => Err(WireError::UnknownPacket(other)),
    }
}

fn parse_optional(payload: &str) -> Result<Option<Value>, WireError> {
    if payload.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(payload)?))
}

fn parse_array(payload: &str) -> Result<Vec<Value>, WireError> {
    match parse_optional(payload)? {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(WireError::Malformed("payload is not an array")),
        None => Ok(Vec::new()),
    }
}
