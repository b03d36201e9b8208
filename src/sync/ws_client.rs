use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ChannelError;

use super::stomp::{parse_frames, Command, Frame, HeartBeat};
use super::types::{ConnectionState, InboundMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Longest timer period the session loop arms; also stands in for "no heart-beat".
const IDLE_PERIOD: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub url: String,
    pub heartbeat: HeartBeat,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

/// A self-reconnecting STOMP session over one WebSocket.
///
/// The supervisor task connects, performs the STOMP handshake, subscribes to `destinations`,
/// forwards MESSAGE frames to `inbound_tx`, and retries after `reconnect_delay` when the
/// session drops. State transitions are published on the shared watch sender, and every
/// established session bumps a counter so observers never miss a reconnect.
pub struct WsClient {
    outgoing_tx: mpsc::Sender<Frame>,
    shutdown_tx: watch::Sender<bool>,
    sessions: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl WsClient {
    pub fn activate(
        options: TransportOptions,
        destinations: Vec<String>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Result<Self, ChannelError> {
        url::Url::parse(&options.url)?;

        let (outgoing_tx, outgoing_rx) = mpsc::channel::<Frame>(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (session_tx, sessions) = watch::channel(0u64);

        let task = tokio::spawn(supervise(
            options,
            destinations,
            inbound_tx,
            outgoing_rx,
            shutdown_rx,
            state,
            session_tx,
        ));

        Ok(Self {
            outgoing_tx,
            shutdown_tx,
            sessions,
            task,
        })
    }

    /// Count of sessions established so far. A fresh receiver reports a change if any
    /// session already came up.
    pub fn sessions(&self) -> watch::Receiver<u64> {
        self.sessions.clone()
    }

    /// Handle for queuing frames onto the live session.
    pub fn sender(&self) -> mpsc::Sender<Frame> {
        self.outgoing_tx.clone()
    }

    pub async fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        self.outgoing_tx
            .send(frame)
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Stop retrying, close the live session (if any) and wait for the supervisor to exit.
    pub async fn deactivate(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            log::error!("WebSocket supervisor ended abnormally: {}", e);
        }
    }
}

async fn supervise(
    options: TransportOptions,
    destinations: Vec<String>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    mut outgoing_rx: mpsc::Receiver<Frame>,
    mut shutdown_rx: watch::Receiver<bool>,
    state: Arc<watch::Sender<ConnectionState>>,
    session_tx: watch::Sender<u64>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        state.send_replace(ConnectionState::Connecting);

        let attempt = tokio::select! {
            res = open_session(&options) => Some(res),
            _ = shutdown_rx.changed() => None,
        };

        match attempt {
            None => break,
            Some(Ok((ws, heartbeat))) => {
                log::info!("STOMP session established with {}", options.url);
                // Frames queued while disconnected are never replayed.
                while let Ok(stale) = outgoing_rx.try_recv() {
                    log::debug!("Dropping stale {} frame queued while offline", stale.command);
                }
                let end = run_session(
                    ws,
                    heartbeat,
                    &destinations,
                    &state,
                    &session_tx,
                    &inbound_tx,
                    &mut outgoing_rx,
                    &mut shutdown_rx,
                )
                .await;
                state.send_replace(ConnectionState::Disconnected);
                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Dropped(reason) => {
                        log::warn!("WebSocket connection lost: {}", reason)
                    }
                }
            }
            Some(Err(e)) => {
                state.send_replace(ConnectionState::Disconnected);
                log::warn!("WebSocket connect failed: {}", e);
            }
        }

        log::debug!("Reconnecting in {:?}", options.reconnect_delay);
        tokio::select! {
            _ = tokio::time::sleep(options.reconnect_delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    state.send_replace(ConnectionState::Disconnected);
    log::info!("WebSocket supervisor stopped");
}

/// Connect and complete the STOMP handshake. Returns the stream and the negotiated
/// outgoing heart-beat interval.
async fn open_session(
    options: &TransportOptions,
) -> Result<(WsStream, Option<Duration>), ChannelError> {
    let url = url::Url::parse(&options.url)?;
    let host = match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => format!("{}:{}", h, p),
        (Some(h), None) => h.to_string(),
        _ => "localhost".to_string(),
    };

    let (mut ws, _) = tokio::time::timeout(options.connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| ChannelError::Timeout("WebSocket upgrade"))??;

    ws.send(Message::Text(Frame::connect(&host, options.heartbeat).encode().into()))
        .await?;

    let connected = tokio::time::timeout(options.connect_timeout, await_connected(&mut ws))
        .await
        .map_err(|_| ChannelError::Timeout("CONNECTED frame"))??;

    let server_hb = connected
        .get("heart-beat")
        .and_then(HeartBeat::parse)
        .unwrap_or_default();
    Ok((ws, options.heartbeat.negotiate_outgoing(server_hb)))
}

async fn await_connected(ws: &mut WsStream) -> Result<Frame, ChannelError> {
    while let Some(msg) = ws.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(ChannelError::Closed),
            _ => continue,
        };
        for frame in parse_frames(text.as_str())? {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => {
                    let message = frame.get("message").unwrap_or("no message").to_string();
                    return Err(ChannelError::Handshake(message));
                }
                other => log::debug!("Ignoring {} before CONNECTED", other),
            }
        }
    }
    Err(ChannelError::Closed)
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

async fn run_session(
    ws: WsStream,
    heartbeat: Option<Duration>,
    destinations: &[String],
    state: &watch::Sender<ConnectionState>,
    session_tx: &watch::Sender<u64>,
    inbound_tx: &mpsc::Sender<InboundMessage>,
    outgoing_rx: &mut mpsc::Receiver<Frame>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut ws_sink, mut ws_stream) = ws.split();

    for (i, destination) in destinations.iter().enumerate() {
        let frame = Frame::subscribe(&format!("sub-{}", i), destination);
        if let Err(e) = ws_sink.send(Message::Text(frame.encode().into())).await {
            return SessionEnd::Dropped(format!("subscribe to {} failed: {}", destination, e));
        }
    }
    // Subscriptions are in place before anyone is told we are live.
    session_tx.send_modify(|n| *n += 1);
    state.send_replace(ConnectionState::Connected);

    let period = heartbeat
        .unwrap_or(IDLE_PERIOD)
        .clamp(Duration::from_millis(1), IDLE_PERIOD);
    let mut beat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = ws_sink
                    .send(Message::Text(Frame::disconnect("bye").encode().into()))
                    .await;
                let _ = ws_sink.close().await;
                return SessionEnd::Shutdown;
            }
            Some(frame) = outgoing_rx.recv() => {
                if let Err(e) = ws_sink.send(Message::Text(frame.encode().into())).await {
                    return SessionEnd::Dropped(format!("send failed: {}", e));
                }
            }
            _ = beat.tick(), if heartbeat.is_some() => {
                if let Err(e) = ws_sink.send(Message::Text("\n".into())).await {
                    return SessionEnd::Dropped(format!("heart-beat failed: {}", e));
                }
            }
            incoming = ws_stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Dropped("closed by server".to_string());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                };
                let frames = match parse_frames(text.as_str()) {
                    Ok(frames) => frames,
                    Err(e) => {
                        log::warn!("Dropping unparseable STOMP data: {}", e);
                        continue;
                    }
                };
                for frame in frames {
                    match frame.command {
                        Command::Message => {
                            let msg = InboundMessage {
                                destination: frame.get("destination").unwrap_or_default().to_string(),
                                body: frame.body,
                            };
                            if inbound_tx.send(msg).await.is_err() {
                                return SessionEnd::Shutdown;
                            }
                        }
                        Command::Error => {
                            let message = frame.get("message").unwrap_or("no message").to_string();
                            log::error!("STOMP error: {} {}", message, frame.body);
                            return SessionEnd::Dropped(format!("STOMP error: {}", message));
                        }
                        Command::Receipt => log::debug!("STOMP receipt {:?}", frame.get("receipt-id")),
                        other => log::debug!("Ignoring unexpected {} frame", other),
                    }
                }
            }
        }
    }
}
