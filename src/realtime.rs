//! Realtime channels over a socket.io WebSocket.
//!
//! One connection task owns the socket. Subscriptions live in a registry
//! keyed by channel; after every reconnect the task replays a `subscribe`
//! event for each registered channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::config::RealtimeConfig;
use crate::error::{Error, Result};
use crate::protocol::{Packet, DEFAULT_NAMESPACE};

/// Event emitted to join a channel
pub const SUBSCRIBE_EVENT: &str = "subscribe";
/// Event emitted to leave a channel
pub const UNSUBSCRIBE_EVENT: &str = "unsubscribe";
/// Listener name that receives every event
pub const ANY_EVENT: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
  Disconnected,
  Connecting,
  Connected,
  Reconnecting,
}

/// An event pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeEvent {
  pub event: String,
  /// `channel` field of the payload, when present
  pub channel: Option<String>,
  pub data: Value,
}

type Handler = (u64, mpsc::UnboundedSender<RealtimeEvent>);

struct ChannelEntry {
  params: Value,
  handlers: Vec<Handler>,
}

#[derive(Default)]
struct Registry {
  channels: HashMap<String, ChannelEntry>,
  listeners: HashMap<String, Vec<Handler>>,
  pending_acks: HashMap<u64, oneshot::Sender<Vec<Value>>>,
}

struct Shared {
  url: String,
  api_key: String,
  config: RealtimeConfig,
  registry: Mutex<Registry>,
  outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
  status: watch::Sender<ConnectionStatus>,
  closing: AtomicBool,
  shutdown: Notify,
  next_id: AtomicU64,
}

impl Shared {
  fn registry(&self) -> MutexGuard<'_, Registry> {
    self.registry.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn status(&self) -> ConnectionStatus {
    *self.status.borrow()
  }

  fn set_status(&self, status: ConnectionStatus) {
    self.status.send_replace(status);
  }

  fn next_id(&self) -> u64 {
    self.next_id.fetch_add(1, Ordering::Relaxed)
  }

  /// Queue a raw frame for the connection task.
  fn send(&self, packet: Packet) -> Result<()> {
    let guard = self.outgoing.lock().unwrap_or_else(|p| p.into_inner());
    let tx = guard.as_ref().ok_or(Error::NotConnected)?;
    tx.send(packet.encode()).map_err(|_| Error::ChannelClosed)
  }

  fn dispatch(&self, event: String, data: Vec<Value>) {
    let payload = data.into_iter().next().unwrap_or(Value::Null);
    let channel = payload
      .get("channel")
      .and_then(Value::as_str)
      .map(str::to_string);
    let message = RealtimeEvent {
      event,
      channel,
      data: payload,
    };

    let mut registry = self.registry();
    if let Some(channel) = &message.channel {
      if let Some(entry) = registry.channels.get_mut(channel) {
        entry.handlers.retain(|(_, tx)| tx.send(message.clone()).is_ok());
      }
    }
    for name in [message.event.as_str(), ANY_EVENT] {
      if let Some(handlers) = registry.listeners.get_mut(name) {
        handlers.retain(|(_, tx)| tx.send(message.clone()).is_ok());
      }
    }
  }

  fn remove_handler(&self, channel: &str, id: u64) {
    let now_empty = {
      let mut registry = self.registry();
      let Some(entry) = registry.channels.get_mut(channel) else {
        return;
      };
      entry.handlers.retain(|(handler_id, _)| *handler_id != id);
      if entry.handlers.is_empty() {
        registry.channels.remove(channel);
        true
      } else {
        false
      }
    };

    if now_empty && self.status() == ConnectionStatus::Connected {
      let _ = self.send(Packet::event(UNSUBSCRIBE_EVENT, json!({ "channel": channel })));
    }
  }
}

/// Stream of events for one channel subscription.
///
/// Dropping the handle removes it from the registry; the server is told to
/// unsubscribe once no handle for the channel remains.
pub struct Subscription {
  id: u64,
  channel: String,
  rx: mpsc::UnboundedReceiver<RealtimeEvent>,
  shared: Weak<Shared>,
}

impl Subscription {
  pub fn channel(&self) -> &str {
    &self.channel
  }

  /// Next event, or `None` once the channel was unsubscribed.
  pub async fn next(&mut self) -> Option<RealtimeEvent> {
    self.rx.recv().await
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(shared) = self.shared.upgrade() {
      shared.remove_handler(&self.channel, self.id);
    }
  }
}

/// Receiver for raw events registered with [`RealtimeModule::on`].
pub struct EventListener {
  rx: mpsc::UnboundedReceiver<RealtimeEvent>,
}

impl EventListener {
  pub async fn next(&mut self) -> Option<RealtimeEvent> {
    self.rx.recv().await
  }
}

pub struct RealtimeModule {
  shared: Arc<Shared>,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeModule {
  pub fn new(url: String, api_key: String, config: RealtimeConfig) -> Self {
    let (status, _) = watch::channel(ConnectionStatus::Disconnected);
    Self {
      shared: Arc::new(Shared {
        url,
        api_key,
        config,
        registry: Mutex::new(Registry::default()),
        outgoing: Mutex::new(None),
        status,
        closing: AtomicBool::new(false),
        shutdown: Notify::new(),
        next_id: AtomicU64::new(1),
      }),
      task: Mutex::new(None),
    }
  }

  pub fn status(&self) -> ConnectionStatus {
    self.shared.status()
  }

  pub fn is_connected(&self) -> bool {
    self.status() == ConnectionStatus::Connected
  }

  /// Watch connection status changes.
  pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
    self.shared.status.subscribe()
  }

  /// Open the socket and wait for the namespace handshake. Calling it while
  /// connected is a no-op.
  pub async fn connect(&self) -> Result<()> {
    let previous = {
      let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
      let closing = self.shared.closing.load(Ordering::SeqCst);
      if !closing && task.as_ref().is_some_and(|t| !t.is_finished()) {
        return match self.status() {
          ConnectionStatus::Connected => Ok(()),
          _ => Err(Error::Connection("connection attempt already in progress".to_string())),
        };
      }
      task.take()
    };
    // a session that is still closing must finish before the next one starts
    if let Some(previous) = previous {
      let _ = previous.await;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    *self.shared.outgoing.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);
    self.shared.closing.store(false, Ordering::SeqCst);

    let (ready_tx, ready_rx) = oneshot::channel();
    let handle = tokio::spawn(run(Arc::clone(&self.shared), rx, ready_tx));
    *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);

    match tokio::time::timeout(self.shared.config.connect_timeout, ready_rx).await {
      Ok(Ok(result)) => result,
      Ok(Err(_)) => Err(Error::ChannelClosed),
      Err(_) => {
        self.disconnect();
        Err(Error::Timeout)
      }
    }
  }

  /// Close the socket and stop reconnecting. Subscriptions stay registered
  /// and are replayed by the next `connect`.
  pub fn disconnect(&self) {
    self.shared.closing.store(true, Ordering::SeqCst);
    // dropping the sender ends the session loop
    self
      .shared
      .outgoing
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .take();
    self.shared.shutdown.notify_waiters();
  }

  /// Join `channel`. `params` (an object) is merged into the subscribe event.
  pub fn subscribe(&self, channel: &str, params: Value) -> Result<Subscription> {
    if channel.trim().is_empty() {
      return Err(Error::Validation("channel must not be empty".to_string()));
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.shared.next_id();
    let first = {
      let mut registry = self.shared.registry();
      let entry = registry
        .channels
        .entry(channel.to_string())
        .or_insert_with(|| ChannelEntry {
          params: params.clone(),
          handlers: Vec::new(),
        });
      entry.handlers.push((id, tx));
      entry.handlers.len() == 1
    };

    // when disconnected, the next handshake replays it
    if first && self.is_connected() {
      let packet = Packet::event(SUBSCRIBE_EVENT, subscribe_payload(channel, &params));
      if let Err(e) = self.shared.send(packet) {
        self.shared.remove_handler(channel, id);
        return Err(e);
      }
    }

    Ok(Subscription {
      id,
      channel: channel.to_string(),
      rx,
      shared: Arc::downgrade(&self.shared),
    })
  }

  /// Row changes on `table`; `event` narrows to "INSERT", "UPDATE" or "DELETE".
  pub fn subscribe_table(&self, table: &str, event: Option<&str>) -> Result<Subscription> {
    let mut params = json!({ "table": table });
    if let Some(event) = event {
      params["event"] = Value::from(event);
    }
    self.subscribe(&format!("table:{}", table), params)
  }

  /// Leave `channel`; every handle for it stops receiving.
  pub fn unsubscribe(&self, channel: &str) -> Result<()> {
    let removed = self.shared.registry().channels.remove(channel).is_some();
    if removed && self.is_connected() {
      self
        .shared
        .send(Packet::event(UNSUBSCRIBE_EVENT, json!({ "channel": channel })))?;
    }
    Ok(())
  }

  /// Channels currently registered.
  pub fn channels(&self) -> Vec<String> {
    let mut channels: Vec<String> = self.shared.registry().channels.keys().cloned().collect();
    channels.sort();
    channels
  }

  /// Receive every server event named `event` (`"*"` for all).
  pub fn on(&self, event: &str) -> EventListener {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = self.shared.next_id();
    self
      .shared
      .registry()
      .listeners
      .entry(event.to_string())
      .or_default()
      .push((id, tx));
    EventListener { rx }
  }

  pub fn emit(&self, event: &str, data: Value) -> Result<()> {
    if !self.is_connected() {
      return Err(Error::NotConnected);
    }
    self.shared.send(Packet::event(event, data))
  }

  /// Emit and wait for the server's acknowledgement.
  pub async fn emit_with_ack(&self, event: &str, data: Value, timeout: Duration) -> Result<Value> {
    if !self.is_connected() {
      return Err(Error::NotConnected);
    }
    let id = self.shared.next_id();
    let (tx, rx) = oneshot::channel();
    self.shared.registry().pending_acks.insert(id, tx);

    let packet = Packet::Event {
      namespace: DEFAULT_NAMESPACE.to_string(),
      id: Some(id),
      event: event.to_string(),
      data: vec![data],
    };
    if let Err(e) = self.shared.send(packet) {
      self.shared.registry().pending_acks.remove(&id);
      return Err(e);
    }

    match tokio::time::timeout(timeout, rx).await {
      Ok(Ok(mut values)) => Ok(if values.is_empty() {
        Value::Null
      } else {
        values.swap_remove(0)
      }),
      Ok(Err(_)) => Err(Error::ChannelClosed),
      Err(_) => {
        self.shared.registry().pending_acks.remove(&id);
        Err(Error::Timeout)
      }
    }
  }

  /// Send `payload` to every subscriber of `channel`.
  pub fn broadcast(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
    self.emit(
      "broadcast",
      json!({ "channel": channel, "event": event, "payload": payload }),
    )
  }
}

impl Drop for RealtimeModule {
  fn drop(&mut self) {
    self.disconnect();
    if let Some(task) = self.task.lock().unwrap_or_else(|p| p.into_inner()).take() {
      task.abort();
    }
  }
}

fn subscribe_payload(channel: &str, params: &Value) -> Value {
  let mut payload = json!({ "channel": channel });
  if let (Value::Object(out), Value::Object(extra)) = (&mut payload, params) {
    for (k, v) in extra {
      out.entry(k.clone()).or_insert_with(|| v.clone());
    }
  }
  payload
}

async fn read_packet<S>(stream: &mut S) -> Result<Packet>
where
  S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
  loop {
    match stream.next().await {
      Some(Ok(Message::Text(text))) => return Packet::decode(text.as_str()),
      Some(Ok(Message::Close(_))) | None => {
        return Err(Error::Connection("socket closed".to_string()))
      }
      Some(Ok(_)) => continue,
      Some(Err(e)) => return Err(Error::from(e)),
    }
  }
}

/// Wait for the namespace connect ack.
async fn await_namespace<K, S>(sink: &mut K, stream: &mut S) -> Result<()>
where
  K: Sink<Message, Error = WsError> + Unpin,
  S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
  loop {
    match read_packet(stream).await? {
      Packet::Connect { .. } => return Ok(()),
      Packet::ConnectError { data, .. } => {
        let message = data
          .get("message")
          .and_then(Value::as_str)
          .unwrap_or("connection refused")
          .to_string();
        return Err(Error::Connection(message));
      }
      Packet::Ping => sink.send(Message::text(Packet::Pong.encode())).await?,
      _ => continue,
    }
  }
}

enum SessionEnd {
  /// The client asked to close.
  Closed,
  /// The socket dropped after a successful handshake.
  Dropped,
}

fn backoff(config: &RealtimeConfig, attempt: u32) -> Duration {
  let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
  config
    .reconnect_delay
    .saturating_mul(factor)
    .min(config.max_reconnect_delay)
}

async fn run(
  shared: Arc<Shared>,
  mut outgoing: mpsc::UnboundedReceiver<String>,
  ready: oneshot::Sender<Result<()>>,
) {
  let mut ready = Some(ready);
  let mut attempt = 0u32;

  loop {
    shared.set_status(if attempt == 0 {
      ConnectionStatus::Connecting
    } else {
      ConnectionStatus::Reconnecting
    });

    match session(&shared, &mut outgoing, &mut ready).await {
      Ok(SessionEnd::Closed) => break,
      Ok(SessionEnd::Dropped) => {
        info!("realtime connection lost");
        attempt = 0;
      }
      Err(e) => {
        if let Some(ready) = ready.take() {
          // first connect failed: report and stop
          let _ = ready.send(Err(e));
          break;
        }
        warn!(error = %e, attempt, "realtime reconnect failed");
      }
    }

    if shared.closing.load(Ordering::SeqCst) || !shared.config.auto_reconnect {
      break;
    }
    attempt += 1;
    if attempt > shared.config.max_reconnect_attempts {
      warn!(attempts = attempt - 1, "giving up on realtime reconnect");
      break;
    }

    shared.set_status(ConnectionStatus::Reconnecting);
    let delay = backoff(&shared.config, attempt);
    debug!(?delay, attempt, "realtime reconnecting");
    let shutdown = shared.shutdown.notified();
    tokio::pin!(shutdown);
    // registered before the flag check so a disconnect in between still wakes us
    shutdown.as_mut().enable();
    if shared.closing.load(Ordering::SeqCst) {
      break;
    }
    tokio::select! {
      _ = tokio::time::sleep(delay) => {}
      _ = &mut shutdown => {}
    }
    if shared.closing.load(Ordering::SeqCst) {
      break;
    }
  }

  // pending acks can never complete now
  shared.registry().pending_acks.clear();
  shared.set_status(ConnectionStatus::Disconnected);
}

async fn session(
  shared: &Shared,
  outgoing: &mut mpsc::UnboundedReceiver<String>,
  ready: &mut Option<oneshot::Sender<Result<()>>>,
) -> Result<SessionEnd> {
  let handshake_timeout = shared.config.connect_timeout;
  let (ws, _) = tokio::time::timeout(handshake_timeout, connect_async(shared.url.as_str()))
    .await
    .map_err(|_| Error::Timeout)??;
  let (mut sink, mut stream) = ws.split();

  let open = match tokio::time::timeout(handshake_timeout, read_packet(&mut stream)).await {
    Ok(Ok(Packet::Open(open))) => open,
    Ok(Ok(other)) => {
      return Err(Error::Protocol(format!("expected open packet, got {:?}", other)))
    }
    Ok(Err(e)) => return Err(e),
    Err(_) => return Err(Error::Timeout),
  };
  debug!(sid = %open.sid, "engine.io open");

  let connect = Packet::Connect {
    namespace: DEFAULT_NAMESPACE.to_string(),
    data: Some(json!({ "apiKey": shared.api_key })),
  };
  sink.send(Message::text(connect.encode())).await?;

  match tokio::time::timeout(handshake_timeout, await_namespace(&mut sink, &mut stream)).await {
    Ok(result) => result?,
    Err(_) => return Err(Error::Timeout),
  }

  shared.set_status(ConnectionStatus::Connected);
  info!(sid = %open.sid, "realtime connected");

  let replay: Vec<(String, Value)> = shared
    .registry()
    .channels
    .iter()
    .map(|(channel, entry)| (channel.clone(), entry.params.clone()))
    .collect();
  for (channel, params) in replay {
    let packet = Packet::event(SUBSCRIBE_EVENT, subscribe_payload(&channel, &params));
    sink.send(Message::text(packet.encode())).await?;
  }

  if let Some(ready) = ready.take() {
    let _ = ready.send(Ok(()));
  }

  // only inbound frames prove the server is alive
  let liveness = Duration::from_millis(open.ping_interval + open.ping_timeout);
  let deadline = tokio::time::sleep(liveness);
  tokio::pin!(deadline);
  loop {
    tokio::select! {
      _ = &mut deadline => {
        warn!("realtime ping timeout");
        return Ok(SessionEnd::Dropped);
      }
      incoming = stream.next() => {
        deadline.as_mut().reset(Instant::now() + liveness);
        let message = match incoming {
          None | Some(Ok(Message::Close(_))) => return Ok(SessionEnd::Dropped),
          Some(Err(e)) => {
            warn!(error = %e, "realtime socket error");
            return Ok(SessionEnd::Dropped);
          }
          Some(Ok(Message::Text(text))) => text,
          Some(Ok(_)) => continue,
        };

        match Packet::decode(message.as_str()) {
          Ok(Packet::Ping) => sink.send(Message::text(Packet::Pong.encode())).await?,
          Ok(Packet::Event { event, data, .. }) => shared.dispatch(event, data),
          Ok(Packet::Ack { id, data, .. }) => {
            let pending = shared.registry().pending_acks.remove(&id);
            if let Some(tx) = pending {
              let _ = tx.send(data);
            }
          }
          Ok(Packet::Disconnect { .. }) | Ok(Packet::Close) => {
            info!("server closed realtime session");
            return Ok(SessionEnd::Dropped);
          }
          Ok(_) => {}
          Err(e) => warn!(error = %e, "dropping malformed realtime frame"),
        }
      }
      frame = outgoing.recv() => match frame {
        Some(text) => sink.send(Message::text(text)).await?,
        None => {
          let bye = Packet::Disconnect { namespace: DEFAULT_NAMESPACE.to_string() };
          let _ = sink.send(Message::text(bye.encode())).await;
          let _ = sink.close().await;
          return Ok(SessionEnd::Closed);
        }
      },
    }
  }
}
