//! Live clipboard-history client: a STOMP subscription channel feeding a reconciled view.

pub mod clipboard;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod sync;
pub mod view;

pub use clipboard::{ClipboardEntry, ExportFormat};
pub use config::Config;
pub use sync::{ApiClient, ChannelEvent, ClipboardGateway, ConnectionState, SubscriptionChannel};
pub use view::{ViewCommand, ViewController};
