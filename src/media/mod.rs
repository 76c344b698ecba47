//! Media handling: staging, fetching, classification and conversion.

pub mod classify;
pub mod convert;
pub mod fetch;
pub mod staging;

pub use classify::{
    classify, ConversionPlan, Decision, InboundAttachment, Ineligible, RemoteFile, Strategy,
};
pub use convert::{ConversionEngine, StillConverter};
pub use fetch::{MediaSource, TelegramMediaSource};
pub use staging::StagedPath;
