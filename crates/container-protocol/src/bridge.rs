//! `postMessage` protocol between the main app page and the embedded
//! container UI.
//!
//! The container server never sends or receives these; they are published
//! for the browser-side bindings and the main app, which share this crate's
//! wire types.

use serde::{Deserialize, Serialize};

/// Session settings pushed down from the main app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_commit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
}

/// Messages exchanged over `window.postMessage`.
///
/// The first two variants flow main app -> container, the rest flow
/// container -> main app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMessage {
    #[serde(rename_all = "camelCase")]
    AuthToken { token: String, session_id: String },
    SettingsUpdate { settings: ContainerSettings },
    #[serde(rename_all = "camelCase")]
    Ready { session_id: String },
    #[serde(rename_all = "camelCase")]
    Error { session_id: String, error: String },
    #[serde(rename_all = "camelCase")]
    TitleSuggest { session_id: String, title: String },
    ContainerHeight { height: u32 },
}

impl BridgeMessage {
    /// Whether the message travels from the main app into the container.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            BridgeMessage::AuthToken { .. } | BridgeMessage::SettingsUpdate { .. }
        )
    }
}
