//! Bloom Server Library
//!
//! HTTP launcher for the voice agent.
//!
//! # Overview
//!
//! - **Supervisor**: owns at most one agent process, started per chat session
//! - **Routes**: `POST /start?chat_id=`, `POST /stop`, `GET /status`, `GET /health`
//! - **Store**: started sessions are recorded in the chats collection of the
//!   same document store the ingestion pipeline writes to
//!
//! Errors are returned as `{"error": {"message": ..., "status": ...}}`.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod shutdown;
pub mod supervisor;

pub use error::AppError;
pub use routes::{router, AppState};
