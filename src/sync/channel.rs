use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::clipboard::{ClipboardEntry, EntryDto};
use crate::config::{Config, MAX_PING_INTERVAL};
use crate::error::ChannelError;

use super::stomp::{Frame, HeartBeat};
use super::types::*;
use super::ws_client::{TransportOptions, WsClient};

const MIN_PING_INTERVAL: Duration = Duration::from_millis(10);

/// Receives decoded bus events. Calls for one channel never overlap.
pub trait ChannelHandler: Send + 'static {
    fn on_new_entry(&mut self, entry: ClipboardEntry);
    fn on_update_entry(&mut self, entry: ClipboardEntry);
    fn on_delete_entry(&mut self, id: i64);
    fn on_clear(&mut self, include_pinned: bool);
    fn on_pong(&mut self, _body: &str) {}

    fn dispatch(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::NewEntry(entry) => self.on_new_entry(entry),
            ChannelEvent::UpdateEntry(entry) => self.on_update_entry(entry),
            ChannelEvent::DeleteEntry(id) => self.on_delete_entry(id),
            ChannelEvent::Clear { include_pinned } => self.on_clear(include_pinned),
            ChannelEvent::Pong(body) => self.on_pong(&body),
        }
    }
}

/// Forward events into a queue owned by another task (e.g. a view controller).
impl ChannelHandler for mpsc::UnboundedSender<ChannelEvent> {
    fn on_new_entry(&mut self, entry: ClipboardEntry) {
        let _ = self.send(ChannelEvent::NewEntry(entry));
    }

    fn on_update_entry(&mut self, entry: ClipboardEntry) {
        let _ = self.send(ChannelEvent::UpdateEntry(entry));
    }

    fn on_delete_entry(&mut self, id: i64) {
        let _ = self.send(ChannelEvent::DeleteEntry(id));
    }

    fn on_clear(&mut self, include_pinned: bool) {
        let _ = self.send(ChannelEvent::Clear { include_pinned });
    }

    fn on_pong(&mut self, body: &str) {
        let _ = self.send(ChannelEvent::Pong(body.to_string()));
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid JSON on {topic}: {reason}")]
    Json { topic: &'static str, reason: String },
    #[error("entry on {0} has no id")]
    MissingId(&'static str),
    #[error("invalid entry id {0:?}")]
    BadId(String),
    #[error("unknown destination {0:?}")]
    UnknownTopic(String),
}

/// Turn one bus message into an event.
pub fn decode_event(destination: &str, body: &str) -> Result<ChannelEvent, DecodeError> {
    match destination {
        TOPIC_NEW => decode_entry(TOPIC_NEW, body).map(ChannelEvent::NewEntry),
        TOPIC_UPDATE => decode_entry(TOPIC_UPDATE, body).map(ChannelEvent::UpdateEntry),
        TOPIC_DELETE => body
            .trim()
            .parse::<i64>()
            .map(ChannelEvent::DeleteEntry)
            .map_err(|_| DecodeError::BadId(body.to_string())),
        TOPIC_CLEAR => serde_json::from_str::<ClearEvent>(body)
            .map(|e| ChannelEvent::Clear {
                include_pinned: e.include_pinned,
            })
            .map_err(|e| DecodeError::Json {
                topic: TOPIC_CLEAR,
                reason: e.to_string(),
            }),
        TOPIC_PONG => Ok(ChannelEvent::Pong(body.to_string())),
        other => Err(DecodeError::UnknownTopic(other.to_string())),
    }
}

fn decode_entry(topic: &'static str, body: &str) -> Result<ClipboardEntry, DecodeError> {
    let dto: EntryDto = serde_json::from_str(body).map_err(|e| DecodeError::Json {
        topic,
        reason: e.to_string(),
    })?;
    dto.into_event_entry().ok_or(DecodeError::MissingId(topic))
}

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub url: String,
    pub ping_interval: Duration,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub heartbeat: HeartBeat,
}

impl ChannelOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.bus_url(),
            ping_interval: config.ping_interval,
            reconnect_delay: config.reconnect_delay,
            connect_timeout: config.connect_timeout,
            heartbeat: HeartBeat::symmetric(config.heartbeat),
        }
    }
}

struct Activation {
    transport: WsClient,
    dispatch: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

/// The live link to the backend's event bus.
///
/// At most one activation exists at a time; `disconnect` waits for the previous one to
/// finish before `connect` may start another.
pub struct SubscriptionChannel<H: ChannelHandler> {
    options: ChannelOptions,
    handler: Arc<Mutex<H>>,
    state: Arc<watch::Sender<ConnectionState>>,
    active: Option<Activation>,
}

impl<H: ChannelHandler> SubscriptionChannel<H> {
    pub fn new(options: ChannelOptions, handler: H) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            options,
            handler: Arc::new(Mutex::new(handler)),
            state: Arc::new(state),
            active: None,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Shared access to the handler, e.g. for inspecting what it collected.
    pub fn handler(&self) -> Arc<Mutex<H>> {
        self.handler.clone()
    }

    pub async fn set_enabled(&mut self, enabled: bool) -> Result<(), ChannelError> {
        if enabled {
            self.connect()
        } else {
            self.disconnect().await;
            Ok(())
        }
    }

    /// Start the transport. No-op while an activation already exists.
    pub fn connect(&mut self) -> Result<(), ChannelError> {
        if self.active.is_some() {
            log::debug!("connect: already active");
            return Ok(());
        }

        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(64);
        let transport = WsClient::activate(
            TransportOptions {
                url: self.options.url.clone(),
                heartbeat: self.options.heartbeat,
                connect_timeout: self.options.connect_timeout,
                reconnect_delay: self.options.reconnect_delay,
            },
            SUBSCRIBED_TOPICS.iter().map(|t| t.to_string()).collect(),
            inbound_tx,
            self.state.clone(),
        )?;

        let dispatch = tokio::spawn(dispatch_loop(inbound_rx, self.handler.clone()));
        let keepalive = tokio::spawn(keepalive_loop(
            transport.sender(),
            self.state.subscribe(),
            transport.sessions(),
            self.options.ping_interval,
        ));

        log::info!("Subscription channel activated for {}", self.options.url);
        self.active = Some(Activation {
            transport,
            dispatch,
            keepalive,
        });
        Ok(())
    }

    /// Tear down the activation: stop pings, close the session, drain the dispatcher.
    pub async fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.keepalive.abort();
        let _ = active.keepalive.await;
        active.transport.deactivate().await;
        // The transport owned the only inbound sender, so the dispatcher ends on its own.
        if let Err(e) = active.dispatch.await {
            log::error!("Dispatch task ended abnormally: {}", e);
        }

        self.state.send_replace(ConnectionState::Disconnected);
        log::info!("Subscription channel deactivated");
    }

    pub async fn reconnect(&mut self) -> Result<(), ChannelError> {
        self.disconnect().await;
        self.connect()
    }

    /// Publish `payload` as JSON to `destination`. Returns `Ok(false)` without queuing
    /// when the channel is not connected.
    pub async fn send_message<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        payload: &T,
    ) -> Result<bool, ChannelError> {
        let active = match (&self.active, self.is_connected()) {
            (Some(active), true) => active,
            _ => {
                log::warn!("Cannot send message to {}: WebSocket not connected", destination);
                return Ok(false);
            }
        };
        let body = serde_json::to_string(payload)?;
        active
            .transport
            .send(Frame::send(destination, body, "application/json"))
            .await?;
        Ok(true)
    }
}

async fn dispatch_loop<H: ChannelHandler>(
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
    handler: Arc<Mutex<H>>,
) {
    while let Some(msg) = inbound_rx.recv().await {
        let event = match decode_event(&msg.destination, &msg.body) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Dropping bus message: {}", e);
                continue;
            }
        };

        match &event {
            ChannelEvent::Pong(body) => log::debug!("Pong received: {}", body),
            other => log::debug!("Bus event: {:?}", other),
        }

        let mut guard = match handler.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if catch_unwind(AssertUnwindSafe(|| guard.dispatch(event))).is_err() {
            log::error!("Channel handler panicked; continuing with next message");
        }
    }
    log::debug!("Dispatch loop ended");
}

/// Ping once per established session, then every `every` while connected.
async fn keepalive_loop(
    outgoing: mpsc::Sender<Frame>,
    state_rx: watch::Receiver<ConnectionState>,
    mut sessions: watch::Receiver<u64>,
    every: Duration,
) {
    let every = every.clamp(MIN_PING_INTERVAL, MAX_PING_INTERVAL);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);

    loop {
        tokio::select! {
            changed = sessions.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = *sessions.borrow_and_update();
                log::debug!("Session {} established; sending ping", session);
                send_ping(&outgoing).await;
                ticker.reset();
            }
            _ = ticker.tick() => {
                if *state_rx.borrow() == ConnectionState::Connected {
                    send_ping(&outgoing).await;
                }
            }
        }
    }
}

async fn send_ping(outgoing: &mpsc::Sender<Frame>) {
    let frame = Frame::send(PING_DESTINATION, PING_BODY, "text/plain");
    if outgoing.send(frame).await.is_err() {
        log::debug!("Ping skipped: transport closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_new_entry() {
        let body = r#"{"id":7,"content":"hello","localDateTime":"2024-01-01T00:00:00","isPinned":false}"#;
        match decode_event(TOPIC_NEW, body).unwrap() {
            ChannelEvent::NewEntry(entry) => {
                assert_eq!(entry.id, 7);
                assert_eq!(entry.content, "hello");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_update_entry() {
        let body = r#"{"id":3,"content":"x","localDateTime":"2024-01-01T00:00:00","isPinned":true}"#;
        let event = decode_event(TOPIC_UPDATE, body).unwrap();
        assert_eq!(event.entry_id(), Some(3));
        assert!(matches!(event, ChannelEvent::UpdateEntry(e) if e.is_pinned));
    }

    #[test]
    fn test_decode_delete_plain_integer() {
        assert_eq!(decode_event(TOPIC_DELETE, "42").unwrap(), ChannelEvent::DeleteEntry(42));
        assert_eq!(decode_event(TOPIC_DELETE, " 9\n").unwrap(), ChannelEvent::DeleteEntry(9));
        assert_eq!(
            decode_event(TOPIC_DELETE, "forty-two"),
            Err(DecodeError::BadId("forty-two".to_string()))
        );
    }

    #[test]
    fn test_decode_clear() {
        assert_eq!(
            decode_event(TOPIC_CLEAR, r#"{"includePinned":true}"#).unwrap(),
            ChannelEvent::Clear {
                include_pinned: true
            }
        );
        assert!(matches!(
            decode_event(TOPIC_CLEAR, "{}"),
            Err(DecodeError::Json { .. })
        ));
    }

    #[test]
    fn test_decode_pong_and_unknown() {
        assert_eq!(
            decode_event(TOPIC_PONG, "pong").unwrap(),
            ChannelEvent::Pong("pong".to_string())
        );
        assert!(matches!(
            decode_event("/topic/other", "x"),
            Err(DecodeError::UnknownTopic(_))
        ));
    }

    #[test]
    fn test_malformed_entry_payloads() {
        assert!(matches!(
            decode_event(TOPIC_NEW, "{not json"),
            Err(DecodeError::Json { .. })
        ));
        assert_eq!(
            decode_event(TOPIC_UPDATE, r#"{"content":"orphan"}"#),
            Err(DecodeError::MissingId(TOPIC_UPDATE))
        );
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    impl ChannelHandler for Recorder {
        fn on_new_entry(&mut self, entry: ClipboardEntry) {
            self.seen.push(format!("new:{}", entry.id));
        }
        fn on_update_entry(&mut self, entry: ClipboardEntry) {
            self.seen.push(format!("update:{}", entry.id));
        }
        fn on_delete_entry(&mut self, id: i64) {
            self.seen.push(format!("delete:{}", id));
        }
        fn on_clear(&mut self, include_pinned: bool) {
            self.seen.push(format!("clear:{}", include_pinned));
        }
    }

    #[test]
    fn test_dispatch_routes_to_callbacks() {
        let mut rec = Recorder::default();
        rec.dispatch(ChannelEvent::DeleteEntry(5));
        rec.dispatch(ChannelEvent::Clear {
            include_pinned: false,
        });
        rec.dispatch(ChannelEvent::Pong("pong".to_string()));
        assert_eq!(rec.seen, vec!["delete:5", "clear:false"]);
    }

    #[test]
    fn test_sender_handler_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let mut handler = tx;
        handler.dispatch(ChannelEvent::DeleteEntry(1));
        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::DeleteEntry(1));
    }

    #[tokio::test]
    async fn test_send_message_is_noop_when_disconnected() {
        let options = ChannelOptions::from_config(&Config::default());
        let channel = SubscriptionChannel::new(options, Recorder::default());
        assert_eq!(channel.connection_state(), ConnectionState::Disconnected);
        assert!(!channel.send_message("/app/x", &"hi").await.unwrap());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let options = ChannelOptions::from_config(&Config::default());
        let mut channel = SubscriptionChannel::new(options, Recorder::default());
        channel.set_enabled(false).await.unwrap();
        assert!(!channel.is_active());
    }

    #[tokio::test]
    async fn test_invalid_url_is_reported() {
        let mut options = ChannelOptions::from_config(&Config::default());
        options.url = "not a url".to_string();
        let mut channel = SubscriptionChannel::new(options, Recorder::default());
        assert!(matches!(channel.connect(), Err(ChannelError::InvalidUrl(_))));
        assert!(!channel.is_active());
    }

    async fn next_ping(rx: &mut mpsc::Receiver<Frame>) -> Frame {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no ping within timeout")
            .expect("outgoing queue closed");
        assert_eq!(frame.get("destination"), Some(PING_DESTINATION));
        assert_eq!(frame.body, PING_BODY);
        frame
    }

    #[tokio::test]
    async fn test_keepalive_pings_each_session_even_when_state_changes_coalesce() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (session_tx, session_rx) = watch::channel(0u64);
        let task = tokio::spawn(keepalive_loop(
            out_tx,
            state_rx,
            session_rx,
            Duration::from_secs(60),
        ));

        session_tx.send_modify(|n| *n += 1);
        state_tx.send_replace(ConnectionState::Connected);
        next_ping(&mut out_rx).await;

        // A drop and reconnect that the state watch only ever reports as Connected.
        state_tx.send_replace(ConnectionState::Disconnected);
        state_tx.send_replace(ConnectionState::Connecting);
        session_tx.send_modify(|n| *n += 1);
        state_tx.send_replace(ConnectionState::Connected);
        next_ping(&mut out_rx).await;

        task.abort();
    }

    #[tokio::test]
    async fn test_keepalive_survives_zero_interval() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (session_tx, session_rx) = watch::channel(0u64);
        let task = tokio::spawn(keepalive_loop(out_tx, state_rx, session_rx, Duration::ZERO));

        session_tx.send_modify(|n| *n += 1);
        next_ping(&mut out_rx).await;
        next_ping(&mut out_rx).await;
        assert!(!task.is_finished());

        task.abort();
    }

    #[tokio::test]
    async fn test_keepalive_accepts_huge_interval() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (session_tx, session_rx) = watch::channel(0u64);
        let task = tokio::spawn(keepalive_loop(out_tx, state_rx, session_rx, Duration::MAX));

        session_tx.send_modify(|n| *n += 1);
        next_ping(&mut out_rx).await;
        assert!(!task.is_finished());

        task.abort();
    }

    #[tokio::test]
    async fn test_keepalive_stops_when_transport_goes_away() {
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (session_tx, session_rx) = watch::channel(0u64);
        let task = tokio::spawn(keepalive_loop(out_tx, state_rx, session_rx, Duration::from_secs(1)));

        drop(session_tx);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("keep-alive kept running")
            .unwrap();
    }
}
