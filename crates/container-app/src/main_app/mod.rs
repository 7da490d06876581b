//! Main app integration.
//!
//! Two channels per session: HTTP webhooks for durable messages and a
//! WebSocket relay for ephemeral stream chunks.

mod client;
mod error;
mod relay;

pub use client::MainAppClient;
pub use error::{MainAppError, MainAppResult};
pub use relay::{RECONNECT_DELAY, Relay, RelayConnection};
