//! Relay dispatcher: forwards a produced still to the destination chat.

use crate::error::DispatchError;
use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use tracing::debug;

/// Destination for relayed stills.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelaySink: Send + Sync {
    /// Send the PNG at `image` to `destination` with `caption`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the send is rejected or does not complete.
    async fn send_still(
        &self,
        destination: i64,
        image: &Path,
        caption: &str,
    ) -> Result<(), DispatchError>;
}

/// Sends stills with `sendPhoto`.
#[derive(Clone)]
pub struct TelegramRelaySink {
    bot: Bot,
}

impl TelegramRelaySink {
    /// Sink posting through `bot`.
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl RelaySink for TelegramRelaySink {
    async fn send_still(
        &self,
        destination: i64,
        image: &Path,
        caption: &str,
    ) -> Result<(), DispatchError> {
        let sent = self
            .bot
            .send_photo(ChatId(destination), InputFile::file(image))
            .caption(caption)
            .await
            .map_err(|e| DispatchError::Send(e.to_string()))?;
        debug!(destination, message_id = sent.id.0, "Still relayed");
        Ok(())
    }
}
