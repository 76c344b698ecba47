//! Media fetcher: resolves a platform file handle and stages its bytes.

use crate::error::FetchError;
use crate::media::classify::RemoteFile;
use crate::media::staging::write_atomic;
use async_trait::async_trait;
use std::path::Path;
use teloxide::errors::DownloadError;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::debug;

/// Source of attachment bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Download `file` into `target`, returning the number of bytes written.
    ///
    /// On success `target` holds the complete payload. On failure `target`
    /// is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on resolution, transport, status, size or
    /// filesystem failures.
    async fn fetch(&self, file: &RemoteFile, target: &Path) -> Result<u64, FetchError>;
}

/// Downloads attachments through the Telegram Bot API file endpoint.
#[derive(Clone)]
pub struct TelegramMediaSource {
    bot: Bot,
    max_bytes: Option<u64>,
}

impl TelegramMediaSource {
    /// Source using `bot` credentials, rejecting payloads above `max_bytes`.
    #[must_use]
    pub const fn new(bot: Bot, max_bytes: Option<u64>) -> Self {
        Self { bot, max_bytes }
    }
}

#[async_trait]
impl MediaSource for TelegramMediaSource {
    async fn fetch(&self, file: &RemoteFile, target: &Path) -> Result<u64, FetchError> {
        let resolved = self
            .bot
            .get_file(FileId(file.id.clone()))
            .await
            .map_err(|e| FetchError::Resolve(e.to_string()))?;

        if let Some(limit) = self.max_bytes {
            check_size(u64::from(resolved.size), limit)?;
        }

        let mut buf = Vec::new();
        self.bot
            .download_file(&resolved.path, &mut buf)
            .await
            .map_err(map_download_error)?;

        let size = buf.len() as u64;
        if let Some(limit) = self.max_bytes {
            check_size(size, limit)?;
        }

        write_atomic(target, buf).await?;
        debug!(file_id = %file.id, bytes = size, path = %target.display(), "Attachment staged");
        Ok(size)
    }
}

/// Reject `size` when it exceeds a non-zero `limit`.
///
/// # Errors
///
/// Returns [`FetchError::TooLarge`] when the cap is exceeded.
pub fn check_size(size: u64, limit: u64) -> Result<(), FetchError> {
    if limit > 0 && size > limit {
        return Err(FetchError::TooLarge { size, limit });
    }
    Ok(())
}

fn map_download_error(e: DownloadError) -> FetchError {
    match e {
        DownloadError::Network(err) => match err.status() {
            Some(status) => status_error(status),
            None => FetchError::Network(err.to_string()),
        },
        other => FetchError::Network(other.to_string()),
    }
}

fn status_error(status: reqwest::StatusCode) -> FetchError {
    FetchError::Status {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
    }
}
