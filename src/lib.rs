//! Still-image relay for Telegram.
//!
//! Watches incoming messages for stickers, animations and GIF or video
//! documents, extracts one PNG still from each and forwards it with a
//! provenance caption to a fixed relay chat.

#![deny(missing_docs)]

/// Telegram dispatcher, handlers and lifecycle
pub mod bot;
/// Environment-driven settings and the routing policy
pub mod config;
/// Error types for relay jobs
pub mod error;
/// Staging, fetching, classification and conversion of media
pub mod media;
/// Inbound message model, captions, dispatch and orchestration
pub mod relay;
