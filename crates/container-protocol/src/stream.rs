//! Ephemeral live-progress events sent over the relay.

use serde::{Deserialize, Serialize};

use crate::messages::TurnItem;

/// One live-progress event for the turn currently running.
///
/// Chunks are never persisted. A `complete` chunk ends the turn's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamChunk {
    /// Incremental assistant text.
    Content { content: String },
    /// A finished turn item.
    Item { item: TurnItem },
    /// Terminator, no payload.
    Complete,
}

impl StreamChunk {
    pub fn content(fragment: impl Into<String>) -> Self {
        StreamChunk::Content {
            content: fragment.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamChunk::Content { .. } => "content",
            StreamChunk::Item { .. } => "item",
            StreamChunk::Complete => "complete",
        }
    }
}
