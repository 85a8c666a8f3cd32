//! socket.io v4 packet encoding for the realtime connection.
//!
//! Only the WebSocket transport is used, so every frame is one Engine.IO
//! packet: a type digit followed by an optional payload. Message packets
//! (`4`) carry a socket.io packet: type digit, optional `/namespace,`,
//! optional ack id, optional JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Engine.IO protocol revision, sent as `EIO=4`
pub const ENGINE_IO_VERSION: u8 = 4;

/// Namespace used when none is given
pub const DEFAULT_NAMESPACE: &str = "/";

/// Engine.IO packet types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnginePacketType {
  Open = b'0',
  Close = b'1',
  Ping = b'2',
  Pong = b'3',
  Message = b'4',
  Upgrade = b'5',
  Noop = b'6',
}

impl TryFrom<u8> for EnginePacketType {
  type Error = ();
  fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
    match v {
      b'0' => Ok(Self::Open),
      b'1' => Ok(Self::Close),
      b'2' => Ok(Self::Ping),
      b'3' => Ok(Self::Pong),
      b'4' => Ok(Self::Message),
      b'5' => Ok(Self::Upgrade),
      b'6' => Ok(Self::Noop),
      _ => Err(()),
    }
  }
}

/// socket.io packet types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SocketPacketType {
  Connect = b'0',
  Disconnect = b'1',
  Event = b'2',
  Ack = b'3',
  ConnectError = b'4',
  BinaryEvent = b'5',
  BinaryAck = b'6',
}

impl TryFrom<u8> for SocketPacketType {
  type Error = ();
  fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
    match v {
      b'0' => Ok(Self::Connect),
      b'1' => Ok(Self::Disconnect),
      b'2' => Ok(Self::Event),
      b'3' => Ok(Self::Ack),
      b'4' => Ok(Self::ConnectError),
      b'5' => Ok(Self::BinaryEvent),
      b'6' => Ok(Self::BinaryAck),
      _ => Err(()),
    }
  }
}

/// Handshake sent by the server in the open packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
  pub sid: String,
  #[serde(default)]
  pub upgrades: Vec<String>,
  /// Milliseconds between server pings
  pub ping_interval: u64,
  /// Milliseconds the server waits for a pong
  pub ping_timeout: u64,
  #[serde(default)]
  pub max_payload: Option<u64>,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
  Open(OpenPayload),
  Close,
  Ping,
  Pong,
  Noop,
  Connect {
    namespace: String,
    data: Option<Value>,
  },
  Disconnect {
    namespace: String,
  },
  Event {
    namespace: String,
    id: Option<u64>,
    event: String,
    data: Vec<Value>,
  },
  Ack {
    namespace: String,
    id: u64,
    data: Vec<Value>,
  },
  ConnectError {
    namespace: String,
    data: Value,
  },
}

impl Packet {
  pub fn event(event: impl Into<String>, data: Value) -> Self {
    Self::Event {
      namespace: DEFAULT_NAMESPACE.to_string(),
      id: None,
      event: event.into(),
      data: vec![data],
    }
  }

  pub fn encode(&self) -> String {
    match self {
      Packet::Open(open) => format!(
        "0{}",
        serde_json::to_string(open).unwrap_or_else(|_| "{}".to_string())
      ),
      Packet::Close => "1".to_string(),
      Packet::Ping => "2".to_string(),
      Packet::Pong => "3".to_string(),
      Packet::Noop => "6".to_string(),
      Packet::Connect { namespace, data } => {
        let mut out = socket_prefix(SocketPacketType::Connect, namespace, None);
        if let Some(data) = data {
          out.push_str(&data.to_string());
        }
        out
      }
      Packet::Disconnect { namespace } => {
        socket_prefix(SocketPacketType::Disconnect, namespace, None)
      }
      Packet::Event {
        namespace,
        id,
        event,
        data,
      } => {
        let mut out = socket_prefix(SocketPacketType::Event, namespace, *id);
        let mut items = Vec::with_capacity(data.len() + 1);
        items.push(Value::String(event.clone()));
        items.extend(data.iter().cloned());
        out.push_str(&Value::Array(items).to_string());
        out
      }
      Packet::Ack { namespace, id, data } => {
        let mut out = socket_prefix(SocketPacketType::Ack, namespace, Some(*id));
        out.push_str(&Value::Array(data.clone()).to_string());
        out
      }
      Packet::ConnectError { namespace, data } => {
        let mut out = socket_prefix(SocketPacketType::ConnectError, namespace, None);
        out.push_str(&data.to_string());
        out
      }
    }
  }

  pub fn decode(text: &str) -> Result<Self> {
    let bytes = text.as_bytes();
    let first = *bytes
      .first()
      .ok_or_else(|| Error::Protocol("empty packet".to_string()))?;
    let kind = EnginePacketType::try_from(first)
      .map_err(|_| Error::Protocol(format!("unknown engine packet type: {}", first as char)))?;
    let rest = &text[1..];

    match kind {
      EnginePacketType::Open => Ok(Packet::Open(serde_json::from_str(rest)?)),
      EnginePacketType::Close => Ok(Packet::Close),
      EnginePacketType::Ping => Ok(Packet::Ping),
      EnginePacketType::Pong => Ok(Packet::Pong),
      EnginePacketType::Noop | EnginePacketType::Upgrade => Ok(Packet::Noop),
      EnginePacketType::Message => decode_socket(rest),
    }
  }
}

fn socket_prefix(kind: SocketPacketType, namespace: &str, id: Option<u64>) -> String {
  let mut out = String::from("4");
  out.push(kind as u8 as char);
  if namespace != DEFAULT_NAMESPACE && !namespace.is_empty() {
    out.push_str(namespace);
    out.push(',');
  }
  if let Some(id) = id {
    out.push_str(&id.to_string());
  }
  out
}

fn decode_socket(text: &str) -> Result<Packet> {
  let first = *text
    .as_bytes()
    .first()
    .ok_or_else(|| Error::Protocol("empty socket.io packet".to_string()))?;
  let kind = SocketPacketType::try_from(first)
    .map_err(|_| Error::Protocol(format!("unknown socket.io packet type: {}", first as char)))?;
  let mut rest = &text[1..];

  let mut namespace = DEFAULT_NAMESPACE.to_string();
  if rest.starts_with('/') {
    let end = rest
      .find(',')
      .ok_or_else(|| Error::Protocol("unterminated namespace".to_string()))?;
    namespace = rest[..end].to_string();
    rest = &rest[end + 1..];
  }

  let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
  let id = if digits > 0 {
    Some(
      rest[..digits]
        .parse::<u64>()
        .map_err(|e| Error::Protocol(format!("invalid ack id: {}", e)))?,
    )
  } else {
    None
  };
  let payload = &rest[digits..];
  let data: Option<Value> = if payload.is_empty() {
    None
  } else {
    Some(serde_json::from_str(payload)?)
  };

  match kind {
    SocketPacketType::Connect => Ok(Packet::Connect { namespace, data }),
    SocketPacketType::Disconnect => Ok(Packet::Disconnect { namespace }),
    SocketPacketType::Event => {
      let mut items = match data {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return Err(Error::Protocol("event packet without a name".to_string())),
      };
      let event = match items.remove(0) {
        Value::String(name) => name,
        other => return Err(Error::Protocol(format!("event name is not a string: {}", other))),
      };
      Ok(Packet::Event {
        namespace,
        id,
        event,
        data: items,
      })
    }
    SocketPacketType::Ack => {
      let id = id.ok_or_else(|| Error::Protocol("ack packet without id".to_string()))?;
      let data = match data {
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
        None => Vec::new(),
      };
      Ok(Packet::Ack { namespace, id, data })
    }
    SocketPacketType::ConnectError => Ok(Packet::ConnectError {
      namespace,
      data: data.unwrap_or(Value::Null),
    }),
    SocketPacketType::BinaryEvent | SocketPacketType::BinaryAck => Err(Error::Protocol(
      "binary packets are not supported".to_string(),
    )),
  }
}
