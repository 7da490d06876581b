//! Runtime configuration.
//!
//! Values are layered with the `config` crate: serde defaults, then an
//! optional TOML file, then the process environment. Environment keys are the
//! flat upper-case names the main app provisions the container with
//! (`SESSION_ID`, `MAIN_APP_URL`, `WORKSPACE_PATH`, ...).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Container not properly configured (missing SESSION_ID or SESSION_TOKEN)")]
    MissingSessionCredentials,
}

/// Container app configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Session this container was provisioned for.
    #[serde(default)]
    pub session_id: Option<String>,

    /// Bearer token shared with the main app.
    #[serde(default)]
    pub session_token: Option<String>,

    /// Base URL of the main app HTTP API.
    #[serde(default = "default_main_app_url")]
    pub main_app_url: String,

    /// Base URL of the main app WebSocket endpoint. Derived from
    /// `main_app_url` when unset.
    #[serde(default)]
    pub main_app_ws_url: Option<String>,

    /// Workspace root the agents operate in and the file API serves.
    #[serde(default = "default_workspace_path")]
    pub workspace_path: PathBuf,

    #[serde(default)]
    pub codex_api_key: Option<String>,

    #[serde(default)]
    pub codex_base_url: Option<String>,

    /// Override for the `codex` executable.
    #[serde(default)]
    pub codex_path: Option<String>,

    #[serde(default = "default_claude_path")]
    pub claude_path: String,

    #[serde(default = "default_droid_path")]
    pub droid_path: String,

    /// Host of the user's own application, target of `/preview`.
    #[serde(default = "default_user_app_host")]
    pub user_app_host: String,

    #[serde(default = "default_user_app_port")]
    pub user_app_port: u16,

    /// Built browser UI, served with an `index.html` fallback.
    #[serde(default = "default_client_dist_path")]
    pub client_dist_path: PathBuf,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_main_app_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_workspace_path() -> PathBuf {
    PathBuf::from("/workspace")
}

fn default_claude_path() -> String {
    "claude".to_string()
}

fn default_droid_path() -> String {
    "droid".to_string()
}

fn default_user_app_host() -> String {
    "localhost".to_string()
}

fn default_user_app_port() -> u16 {
    3000
}

fn default_client_dist_path() -> PathBuf {
    PathBuf::from("dist/client")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            session_token: None,
            main_app_url: default_main_app_url(),
            main_app_ws_url: None,
            workspace_path: default_workspace_path(),
            codex_api_key: None,
            codex_base_url: None,
            codex_path: None,
            claude_path: default_claude_path(),
            droid_path: default_droid_path(),
            user_app_host: default_user_app_host(),
            user_app_port: default_user_app_port(),
            client_dist_path: default_client_dist_path(),
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Session identity used for every main-app call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub session_id: String,
    pub token: String,
}

impl AppConfig {
    /// Load from an optional TOML file and the process environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(config_file, None)
    }

    /// Like [`AppConfig::load`], but reads environment values from `env`
    /// instead of the process environment when given.
    pub fn load_from(
        config_file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let mut environment = Environment::default();
        if let Some(vars) = env {
            environment = environment.source(Some(vars.into_iter().collect()));
        }

        let settings = builder.add_source(environment).build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Session id and token, or `MissingSessionCredentials` when either is
    /// absent or empty.
    pub fn session_credentials(&self) -> Result<SessionCredentials, ConfigError> {
        let session_id = self.session_id.as_deref().filter(|v| !v.is_empty());
        let token = self.session_token.as_deref().filter(|v| !v.is_empty());

        match (session_id, token) {
            (Some(session_id), Some(token)) => Ok(SessionCredentials {
                session_id: session_id.to_string(),
                token: token.to_string(),
            }),
            _ => Err(ConfigError::MissingSessionCredentials),
        }
    }

    /// Main app base URL without a trailing slash.
    pub fn main_app_base_url(&self) -> String {
        self.main_app_url.trim_end_matches('/').to_string()
    }

    /// WebSocket base URL, derived from `main_app_url` by protocol
    /// substitution when not set explicitly.
    pub fn main_app_ws_base_url(&self) -> String {
        match self.main_app_ws_url.as_deref() {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => derive_ws_url(&self.main_app_base_url()),
        }
    }
}

/// `http://` becomes `ws://`, `https://` becomes `wss://`.
fn derive_ws_url(http_url: &str) -> String {
    match http_url.strip_prefix("http") {
        Some(rest) => format!("ws{rest}"),
        None => http_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::load_from(None, Some(HashMap::new())).unwrap();
        assert_eq!(config.main_app_url, "http://localhost:3000");
        assert_eq!(config.workspace_path, PathBuf::from("/workspace"));
        assert_eq!(config.droid_path, "droid");
        assert_eq!(config.user_app_port, 3000);
        assert_eq!(config.port, 3001);
        assert!(config.session_id.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::load_from(
            None,
            Some(env(&[
                ("SESSION_ID", "sess_1"),
                ("SESSION_TOKEN", "secret"),
                ("MAIN_APP_URL", "https://main.example.com"),
                ("WORKSPACE_PATH", "/tmp/ws"),
                ("DROID_PATH", "/opt/droid"),
                ("USER_APP_PORT", "5173"),
            ])),
        )
        .unwrap();

        assert_eq!(config.session_id.as_deref(), Some("sess_1"));
        assert_eq!(config.workspace_path, PathBuf::from("/tmp/ws"));
        assert_eq!(config.droid_path, "/opt/droid");
        assert_eq!(config.user_app_port, 5173);
        assert_eq!(config.main_app_ws_base_url(), "wss://main.example.com");
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "main_app_url = \"http://file.example:9000\"").unwrap();
        writeln!(file, "droid_path = \"/from/file\"").unwrap();

        let config = AppConfig::load_from(
            Some(file.path()),
            Some(env(&[("DROID_PATH", "/from/env")])),
        )
        .unwrap();

        assert_eq!(config.main_app_url, "http://file.example:9000");
        assert_eq!(config.droid_path, "/from/env");
    }

    #[test]
    fn test_ws_url_derivation() {
        let mut config = AppConfig::default();
        assert_eq!(config.main_app_ws_base_url(), "ws://localhost:3000");

        config.main_app_url = "http://main:3000/".to_string();
        assert_eq!(config.main_app_ws_base_url(), "ws://main:3000");

        config.main_app_ws_url = Some("wss://relay.example".to_string());
        assert_eq!(config.main_app_ws_base_url(), "wss://relay.example");
    }

    #[test]
    fn test_missing_credentials() {
        let mut config = AppConfig::default();
        assert!(matches!(
            config.session_credentials(),
            Err(ConfigError::MissingSessionCredentials)
        ));

        config.session_id = Some("sess".to_string());
        config.session_token = Some(String::new());
        assert!(config.session_credentials().is_err());

        config.session_token = Some("tok".to_string());
        let creds = config.session_credentials().unwrap();
        assert_eq!(creds.session_id, "sess");
        assert_eq!(creds.token, "tok");
    }
}
