//! Realtime module against an in-process socket.io server.

use std::time::Duration;

use fluxez::protocol::Packet;
use fluxez::{ClientConfig, ConnectionStatus, Error, RealtimeConfig, RealtimeModule};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const OPEN: &str = r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;
const WAIT: Duration = Duration::from_secs(5);

type Socket = WebSocketStream<TcpStream>;

fn config() -> RealtimeConfig {
  RealtimeConfig {
    auto_reconnect: true,
    max_reconnect_attempts: 5,
    reconnect_delay: Duration::from_millis(50),
    max_reconnect_delay: Duration::from_millis(200),
    connect_timeout: Duration::from_secs(2),
  }
}

async fn listen() -> (TcpListener, String) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let url = format!("ws://{}/socket.io/?EIO=4&transport=websocket", addr);
  (listener, url)
}

async fn accept(listener: &TcpListener) -> Socket {
  let (stream, _) = listener.accept().await.unwrap();
  accept_async(stream).await.unwrap()
}

async fn next_text(ws: &mut Socket) -> Option<String> {
  loop {
    match ws.next().await {
      Some(Ok(Message::Text(text))) => return Some(text.as_str().to_string()),
      Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
      Some(Ok(_)) => continue,
    }
  }
}

async fn handshake(ws: &mut Socket) -> Value {
  ws.send(Message::text(OPEN)).await.unwrap();
  let connect = next_text(ws).await.unwrap();
  let auth = match Packet::decode(&connect).unwrap() {
    Packet::Connect { data, .. } => data.unwrap_or(Value::Null),
    other => panic!("expected namespace connect, got {:?}", other),
  };
  ws.send(Message::text(r#"40{"sid":"n1"}"#)).await.unwrap();
  auth
}

fn event_of(frame: &str) -> Option<(Option<u64>, String, Vec<Value>)> {
  match Packet::decode(frame).ok()? {
    Packet::Event { id, event, data, .. } => Some((id, event, data)),
    _ => None,
  }
}

#[tokio::test]
async fn test_session_round_trip() {
  let (listener, url) = listen().await;

  let server = tokio::spawn(async move {
    let mut ws = accept(&listener).await;
    let auth = handshake(&mut ws).await;
    assert_eq!(auth, json!({"apiKey": "key-1"}));

    let mut frames = Vec::new();
    while let Some(frame) = next_text(&mut ws).await {
      frames.push(frame.clone());
      match event_of(&frame) {
        Some((None, name, data)) if name == "subscribe" => {
          assert_eq!(data[0], json!({"channel": "orders", "status": "open"}));
          ws.send(Message::text(r#"42["change",{"channel":"orders","id":7}]"#))
            .await
            .unwrap();
          ws.send(Message::text("2")).await.unwrap();
        }
        Some((Some(id), name, data)) if name == "echo" => {
          let reply = Packet::Ack {
            namespace: "/".to_string(),
            id,
            data: vec![json!({"echoed": data[0].clone()})],
          };
          ws.send(Message::text(reply.encode())).await.unwrap();
        }
        _ => {}
      }
      if frame == "41" {
        break;
      }
    }
    frames
  });

  let module = RealtimeModule::new(url, "key-1".to_string(), config());
  assert_eq!(module.status(), ConnectionStatus::Disconnected);
  module.connect().await.unwrap();
  assert!(module.is_connected());

  let mut orders = module
    .subscribe("orders", json!({"status": "open"}))
    .unwrap();
  let event = tokio::time::timeout(WAIT, orders.next()).await.unwrap().unwrap();
  assert_eq!(event.event, "change");
  assert_eq!(event.channel.as_deref(), Some("orders"));
  assert_eq!(event.data["id"], 7);

  let reply = module
    .emit_with_ack("echo", json!({"n": 1}), WAIT)
    .await
    .unwrap();
  assert_eq!(reply, json!({"echoed": {"n": 1}}));

  module.disconnect();
  let frames = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
  assert!(frames.iter().any(|f| f == "3"), "pong missing: {:?}", frames);
  assert_eq!(frames.last().map(String::as_str), Some("41"));

  let mut status = module.status_changes();
  tokio::time::timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Disconnected))
    .await
    .unwrap()
    .unwrap();
  assert!(matches!(module.emit("late", Value::Null), Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_reconnect_replays_subscriptions() {
  let (listener, url) = listen().await;

  let server = tokio::spawn(async move {
    // first session: take the replayed subscribe, then drop the socket
    let mut first = accept(&listener).await;
    handshake(&mut first).await;
    let frame = next_text(&mut first).await.unwrap();
    let (_, name, data) = event_of(&frame).unwrap();
    assert_eq!(name, "subscribe");
    assert_eq!(data[0]["channel"], "table:users");
    let _ = first.close(None).await;
    drop(first);

    // second session must subscribe again without client involvement
    let mut second = accept(&listener).await;
    handshake(&mut second).await;
    let frame = next_text(&mut second).await.unwrap();
    let (_, name, data) = event_of(&frame).unwrap();
    assert_eq!(name, "subscribe");
    assert_eq!(
      data[0],
      json!({"channel": "table:users", "table": "users", "event": "INSERT"})
    );
    second
      .send(Message::text(
        r#"42["INSERT",{"channel":"table:users","record":{"id":1}}]"#,
      ))
      .await
      .unwrap();
    while next_text(&mut second).await.is_some() {}
  });

  let module = RealtimeModule::new(url, "key".to_string(), config());
  let mut users = module.subscribe_table("users", Some("INSERT")).unwrap();
  module.connect().await.unwrap();

  let event = tokio::time::timeout(WAIT, users.next()).await.unwrap().unwrap();
  assert_eq!(event.event, "INSERT");
  assert_eq!(event.data["record"]["id"], 1);
  assert!(module.is_connected());

  module.disconnect();
  tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connect_error_is_reported() {
  let (listener, url) = listen().await;

  tokio::spawn(async move {
    let mut ws = accept(&listener).await;
    ws.send(Message::text(OPEN)).await.unwrap();
    let _ = next_text(&mut ws).await;
    ws.send(Message::text(r#"44{"message":"invalid api key"}"#))
      .await
      .unwrap();
    while next_text(&mut ws).await.is_some() {}
  });

  let module = RealtimeModule::new(url, "bad".to_string(), config());
  match module.connect().await {
    Err(Error::Connection(message)) => assert_eq!(message, "invalid api key"),
    other => panic!("expected connection error, got {:?}", other),
  }

  let mut status = module.status_changes();
  tokio::time::timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Disconnected))
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn test_connect_refused() {
  let (listener, url) = listen().await;
  drop(listener);

  let module = RealtimeModule::new(url, "key".to_string(), config());
  assert!(module.connect().await.is_err());
  assert!(!module.is_connected());
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
  let (listener, url) = listen().await;

  let server = tokio::spawn(async move {
    let mut first = accept(&listener).await;
    handshake(&mut first).await;
    while let Some(frame) = next_text(&mut first).await {
      if frame == "41" {
        break;
      }
    }
    drop(first);

    let mut second = accept(&listener).await;
    handshake(&mut second).await;
    while next_text(&mut second).await.is_some() {}
  });

  let module = RealtimeModule::new(url, "key".to_string(), config());
  module.connect().await.unwrap();
  module.disconnect();
  module.connect().await.unwrap();
  assert!(module.is_connected());

  tokio::time::sleep(Duration::from_millis(300)).await;
  assert_eq!(module.status(), ConnectionStatus::Connected);

  module.disconnect();
  tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_subscribe_is_not_replayed() {
  let (listener, url) = listen().await;

  tokio::spawn(async move {
    let mut ws = accept(&listener).await;
    handshake(&mut ws).await;
    while next_text(&mut ws).await.is_some() {}
  });

  let module = RealtimeModule::new(url, "key".to_string(), config());
  module.connect().await.unwrap();

  // the connection task has not observed the disconnect yet
  module.disconnect();
  assert!(module.is_connected());
  assert!(matches!(
    module.subscribe("orders", Value::Null),
    Err(Error::NotConnected)
  ));
  assert!(module.channels().is_empty());
}

#[tokio::test]
async fn test_silent_server_is_dropped_despite_outgoing_traffic() {
  let (listener, url) = listen().await;

  tokio::spawn(async move {
    let mut ws = accept(&listener).await;
    ws.send(Message::text(
      r#"0{"sid":"s1","upgrades":[],"pingInterval":100,"pingTimeout":100}"#,
    ))
    .await
    .unwrap();
    let _ = next_text(&mut ws).await;
    ws.send(Message::text(r#"40{"sid":"n1"}"#)).await.unwrap();
    // never ping, only listen
    while next_text(&mut ws).await.is_some() {}
  });

  let module = RealtimeModule::new(
    url,
    "key".to_string(),
    RealtimeConfig {
      auto_reconnect: false,
      ..config()
    },
  );
  module.connect().await.unwrap();

  let deadline = Instant::now() + WAIT;
  while module.is_connected() && Instant::now() < deadline {
    let _ = module.emit("tick", json!({}));
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
  assert!(!module.is_connected());
}

#[tokio::test]
async fn test_backoff_not_skipped_after_earlier_disconnect() {
  let (listener, url) = listen().await;

  let server = tokio::spawn(async move {
    let mut first = accept(&listener).await;
    handshake(&mut first).await;
    while let Some(frame) = next_text(&mut first).await {
      if frame == "41" {
        break;
      }
    }
    drop(first);

    let mut second = accept(&listener).await;
    handshake(&mut second).await;
    // let the client see the namespace ack before dropping it
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = second.close(None).await;
    drop(second);
    let dropped_at = Instant::now();

    let mut third = accept(&listener).await;
    let waited = dropped_at.elapsed();
    handshake(&mut third).await;
    while next_text(&mut third).await.is_some() {}
    waited
  });

  let module = RealtimeModule::new(
    url,
    "key".to_string(),
    RealtimeConfig {
      reconnect_delay: Duration::from_millis(400),
      max_reconnect_delay: Duration::from_secs(1),
      ..config()
    },
  );
  module.connect().await.unwrap();
  module.disconnect();
  module.connect().await.unwrap();

  let mut status = module.status_changes();
  tokio::time::timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Reconnecting))
    .await
    .unwrap()
    .unwrap();
  tokio::time::timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Connected))
    .await
    .unwrap()
    .unwrap();

  module.disconnect();
  let waited = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
  assert!(waited >= Duration::from_millis(300), "reconnected after {:?}", waited);
}

#[tokio::test]
async fn test_secure_url_negotiates_tls() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();

  let server = tokio::spawn(async move {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut first = [0u8; 1];
    let read = stream.read(&mut first).await.unwrap();
    (read, first[0])
  });

  let client_config = ClientConfig::new("key").with_base_url(format!("https://{}/api/v1", addr));
  let url = client_config.websocket_url().unwrap();
  assert!(url.starts_with("wss://"));

  let module = RealtimeModule::new(url, "key".to_string(), config());
  let result = module.connect().await;
  assert!(result.is_err());

  // 0x16 opens a TLS handshake record
  let (read, first) = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
  assert_eq!(read, 1);
  assert_eq!(first, 0x16);
}
