pub mod api_client;
pub mod channel;
pub mod stomp;
pub mod types;
pub mod ws_client;

pub use api_client::{ApiClient, ClipboardGateway};
pub use channel::{ChannelHandler, ChannelOptions, SubscriptionChannel};
pub use types::{ChannelEvent, ConnectionState};
