use serde::{Deserialize, Serialize};

use crate::clipboard::ClipboardEntry;

// ── Bus destinations ────────────────────────────────────────────────────────

pub const TOPIC_NEW: &str = "/topic/clipboard/new";
pub const TOPIC_UPDATE: &str = "/topic/clipboard/update";
pub const TOPIC_DELETE: &str = "/topic/clipboard/delete";
pub const TOPIC_CLEAR: &str = "/topic/clipboard/clear";
pub const TOPIC_PONG: &str = "/topic/clipboard/pong";

pub const SUBSCRIBED_TOPICS: [&str; 5] = [TOPIC_NEW, TOPIC_UPDATE, TOPIC_DELETE, TOPIC_CLEAR, TOPIC_PONG];

pub const PING_DESTINATION: &str = "/app/clipboard/ping";
pub const PING_BODY: &str = "ping";

// ── Status types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Offline",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Live",
        }
    }
}

// ── Bus payloads ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClearEvent {
    pub include_pinned: bool,
}

/// One decoded server-pushed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    NewEntry(ClipboardEntry),
    UpdateEntry(ClipboardEntry),
    DeleteEntry(i64),
    Clear { include_pinned: bool },
    Pong(String),
}

impl ChannelEvent {
    /// Entry id this event is about, if any.
    pub fn entry_id(&self) -> Option<i64> {
        match self {
            ChannelEvent::NewEntry(e) | ChannelEvent::UpdateEntry(e) => Some(e.id),
            ChannelEvent::DeleteEntry(id) => Some(*id),
            _ => None,
        }
    }
}

/// A MESSAGE frame reduced to what the channel needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub destination: String,
    pub body: String,
}
