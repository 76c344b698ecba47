use crate::media::{ConversionEngine, TelegramMediaSource};
use crate::relay::{RelayPipeline, TelegramRelaySink};

/// Command and message handlers
pub mod handlers;
/// Dispatcher setup and shutdown
pub mod runner;

/// Pipeline wired to the Telegram Bot API.
pub type TelegramPipeline = RelayPipeline<TelegramMediaSource, ConversionEngine, TelegramRelaySink>;
