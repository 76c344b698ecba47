//! Relay side of the pipeline: inbound message model, caption, dispatch and
//! orchestration.

pub mod caption;
pub mod dispatch;
pub mod message;
pub mod pipeline;

pub use dispatch::{RelaySink, TelegramRelaySink};
pub use message::{ChatInfo, InboundMessage, SenderInfo};
pub use pipeline::{IgnoreReason, JobOutcome, RelayPipeline};
