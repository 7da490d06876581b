//! Agent backend selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The agent backends a turn can be routed to.
///
/// Wire names match what the browser UI and the main app store in
/// `responderProvider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentProvider {
    /// Codex SDK: long-lived thread handles.
    #[serde(rename = "CodexSDK")]
    CodexSdk,
    /// Claude Code SDK: generator-style message stream.
    #[serde(rename = "ClaudeCodeSDK")]
    ClaudeCodeSdk,
    /// Droid CLI: subprocess emitting newline-delimited JSON.
    #[serde(rename = "DroidCLI")]
    DroidCli,
}

impl AgentProvider {
    pub const ALL: [AgentProvider; 3] = [
        AgentProvider::CodexSdk,
        AgentProvider::ClaudeCodeSdk,
        AgentProvider::DroidCli,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentProvider::CodexSdk => "CodexSDK",
            AgentProvider::ClaudeCodeSdk => "ClaudeCodeSDK",
            AgentProvider::DroidCli => "DroidCLI",
        }
    }
}

impl fmt::Display for AgentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a provider name matches none of the known backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown provider: {}", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for AgentProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentProvider::ALL
            .into_iter()
            .find(|provider| provider.as_str() == s)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}
