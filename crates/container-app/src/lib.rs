//! Per-session container backend.
//!
//! Runs coding-agent turns for one session, persists the conversation to the
//! main app, relays partial output over a WebSocket, and exposes the
//! workspace files and the user's preview app over HTTP.

pub mod agent;
pub mod api;
pub mod config;
pub mod main_app;
