//! DbNet Server - HTTP and websocket transport
//!
//! A thin axum layer over the brokers. Every route decodes its request,
//! calls one broker operation and encodes the outcome; the websocket
//! dispatcher reaches the same operations through typed envelopes.
//!
//! # Status codes
//!
//! A submission still running when the continuation ticker fires answers
//! `202 Accepted` with its intermediate snapshot. The client repeats the
//! request with the `DbNet-Continue` header to pick the wait up again.

mod api;
mod config;
mod error;
mod files;
mod request;
mod routes;
mod state;
mod ws;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use files::{FileItem, FileRequest};
pub use request::{DbtRequest, JobIdRequest, MetaRequest, SessionRequest, SqlRequest};
pub use routes::{CONTINUE_HEADER, router, serve};
pub use state::AppState;
pub use ws::{WsMessage, WsReply};

#[cfg(test)]
mod tests;
