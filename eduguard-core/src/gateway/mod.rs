//! # HTTP Gateway
//!
//! Exposes the pipeline over HTTP: `POST /ask` runs one pipeline pass and
//! `GET /health` reports liveness and the configured backends.
//!
//! Blocked prompts map to `400`, every other pipeline failure to `500`; both
//! carry a `{"detail": ...}` body so clients can tell the two apart.

mod server;

pub use server::{AppState, router, serve};

use serde::{Deserialize, Serialize};

/// Body of `POST /ask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub prompt: String,
}

/// Error body returned for any non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
