//! A minimal in-process STOMP-over-WebSocket broker for channel tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use clipdock::sync::stomp::{parse_frames, Command, Frame};

#[derive(Default)]
struct Shared {
    accepted: AtomicUsize,
    frames: Mutex<Vec<(usize, Frame)>>,
    live: Mutex<HashMap<usize, mpsc::UnboundedSender<String>>>,
}

pub struct TestBus {
    pub url: String,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl TestBus {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());

        let task = tokio::spawn({
            let shared = shared.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let id = shared.accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(id, stream, shared.clone()));
                }
            }
        });

        Self {
            url: format!("ws://{}/ws-clipboard/websocket", addr),
            shared,
            task,
        }
    }

    pub fn total_connections(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    pub fn live_connections(&self) -> usize {
        self.shared.live.lock().unwrap().len()
    }

    pub fn frames(&self, command: Command) -> Vec<(usize, Frame)> {
        self.shared
            .frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, f)| f.command == command)
            .cloned()
            .collect()
    }

    /// Push a MESSAGE frame to every live session.
    pub fn publish(&self, destination: &str, body: &str) {
        let text = Frame::new(Command::Message)
            .header("destination", destination)
            .header("subscription", "sub-0")
            .header("message-id", "1")
            .with_body(body)
            .encode();
        self.publish_raw(&text);
    }

    pub fn publish_raw(&self, text: &str) {
        for tx in self.shared.live.lock().unwrap().values() {
            let _ = tx.send(text.to_string());
        }
    }

    /// Poll `check` until it holds, panicking after a few seconds.
    pub async fn wait_for(&self, what: &str, check: impl Fn(&TestBus) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check(self) {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {}", what);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestBus {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(id: usize, stream: TcpStream, shared: Arc<Shared>) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();

    loop {
        tokio::select! {
            Some(text) = push_rx.recv() => {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = source.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(frames) = parse_frames(&text) else {
                    continue;
                };
                for frame in frames {
                    let reply = match frame.command {
                        Command::Connect => Some(
                            Frame::new(Command::Connected)
                                .header("version", "1.2")
                                .header("heart-beat", "0,0"),
                        ),
                        Command::Disconnect => frame
                            .get("receipt")
                            .map(|r| Frame::new(Command::Receipt).header("receipt-id", r)),
                        _ => None,
                    };
                    if frame.command == Command::Subscribe {
                        // Live once the client starts subscribing, so publishes reach it.
                        shared.live.lock().unwrap().insert(id, push_tx.clone());
                    }
                    shared.frames.lock().unwrap().push((id, frame));
                    if let Some(reply) = reply {
                        let _ = sink.send(Message::Text(reply.encode())).await;
                    }
                }
            }
        }
    }

    shared.live.lock().unwrap().remove(&id);
}
