//! HTTP API module.
//!
//! Chat endpoints, workspace file access, the preview proxy and the static
//! frontend.

mod error;
mod health;
mod messages;
mod preview;
mod routes;
mod state;
mod workspace;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use messages::{MAX_CONTENT_CHARS, SendMessageRequest};
pub use routes::{MAX_BODY_BYTES, create_router};
pub use state::AppState;
pub use workspace::{WorkspaceFile, list_workspace_files};
