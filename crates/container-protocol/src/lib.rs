//! Wire types for the container app.
//!
//! These types cross three boundaries:
//!
//! ```text
//! Browser UI <--[HTTP /api]--> Container App <--[HTTP webhooks + WS relay]--> Main App
//!      ^                                                                        |
//!      +----------------------[WS: stream chunks]-------------------------------+
//! ```
//!
//! 1. **Messages are persistent, chunks are ephemeral.** The main app owns the
//!    message history. Stream chunks are best-effort live progress and are never
//!    replayed.
//! 2. **Turn items are opaque.** The container only looks at the `type`
//!    discriminator; every other field is carried through untouched.

pub mod bridge;
pub mod messages;
pub mod provider;
pub mod stream;

pub use bridge::{BridgeMessage, ContainerSettings};
pub use messages::{
    Message, MessageAttachment, MessageRole, PostedMessage, Responder, TurnItem,
    WebhookAttachment, WebhookMessagePayload,
};
pub use provider::{AgentProvider, UnknownProvider};
pub use stream::StreamChunk;
