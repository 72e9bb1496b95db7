//! ComfyUI REST and WebSocket client library.
//!
//! Provides the [`backend::ComfyBackend`] boundary the provider pipeline
//! talks to, an HTTP/WebSocket implementation of it, typed WebSocket
//! message parsing, workflow execution with progress reporting, and the
//! classification of raw SDK failures into the domain error taxonomy.

pub mod api;
pub mod backend;
pub mod classify;
pub mod client;
pub mod events;
pub mod executor;
pub mod messages;
