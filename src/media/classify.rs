//! Format classification for inbound attachments.
//!
//! [`classify`] is total: every attachment maps to either a conversion plan
//! or an explicit [`Ineligible`] reason. It never fails.

// lazy_regex! statics are validated at compile time
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use std::fmt;

/// Video container names accepted for documents without a video MIME type.
static RE_VIDEO_NAME: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)\.(mp4|webm|mov|mkv)$");

/// Trailing dot-extension of a file name.
static RE_TRAILING_EXT: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"(?i)\.[a-z0-9]+$");

/// Opaque platform file handle plus the size the platform declared for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Platform file id.
    pub id: String,
    /// Declared size in bytes, if known.
    pub size: Option<u64>,
}

impl RemoteFile {
    /// Handle with an unknown size.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            size: None,
        }
    }
}

/// Media attachment carried by an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundAttachment {
    /// Sticker in one of the three sticker formats.
    Sticker {
        /// Remote file.
        file: RemoteFile,
        /// Vector animation (TGS).
        is_animated: bool,
        /// WebM video sticker.
        is_video: bool,
    },
    /// GIF-style animation (delivered by the platform as MP4).
    Animation {
        /// Remote file.
        file: RemoteFile,
    },
    /// Generic file attachment.
    Document {
        /// Remote file.
        file: RemoteFile,
        /// Declared MIME type.
        mime_type: Option<String>,
        /// Original file name.
        file_name: Option<String>,
    },
}

impl InboundAttachment {
    /// Remote file behind the attachment.
    #[must_use]
    pub const fn file(&self) -> &RemoteFile {
        match self {
            Self::Sticker { file, .. } | Self::Animation { file } | Self::Document { file, .. } => {
                file
            }
        }
    }
}

/// How a staged attachment becomes a PNG still.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Decode a still raster container and re-encode it as PNG.
    RasterReencode,
    /// Decode a video or animation stream and keep its first frame.
    FrameExtract,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RasterReencode => f.write_str("raster_reencode"),
            Self::FrameExtract => f.write_str("frame_extract"),
        }
    }
}

/// Accepted attachment: what to run and how to label it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionPlan {
    /// Conversion strategy.
    pub strategy: Strategy,
    /// Human label used in the relay caption.
    pub kind: &'static str,
    /// Extension for the staged input file, with leading dot.
    pub input_ext: String,
}

/// Why an attachment is silently skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    /// Vector-animated sticker; no renderer for that format.
    AnimatedSticker,
    /// Document that looks like neither a GIF nor a video.
    UnsupportedDocument,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnimatedSticker => f.write_str("animated sticker"),
            Self::UnsupportedDocument => f.write_str("unsupported document"),
        }
    }
}

/// Classification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Convert with the given plan.
    Convert(ConversionPlan),
    /// Ignore the attachment.
    Ineligible(Ineligible),
}

/// Decide how (or whether) to convert an attachment.
#[must_use]
pub fn classify(attachment: &InboundAttachment) -> Decision {
    match attachment {
        InboundAttachment::Sticker { is_animated: true, .. } => {
            Decision::Ineligible(Ineligible::AnimatedSticker)
        }
        InboundAttachment::Sticker { is_video: true, .. } => {
            plan(Strategy::FrameExtract, "video sticker", ".webm")
        }
        InboundAttachment::Sticker { .. } => plan(Strategy::RasterReencode, "sticker", ".webp"),
        InboundAttachment::Animation { .. } => plan(Strategy::FrameExtract, "animation/GIF", ".mp4"),
        InboundAttachment::Document {
            mime_type,
            file_name,
            ..
        } => classify_document(mime_type.as_deref().unwrap_or(""), file_name.as_deref().unwrap_or("")),
    }
}

fn classify_document(mime: &str, name: &str) -> Decision {
    let looks_like_gif = mime == "image/gif" || name.to_lowercase().ends_with(".gif");
    let looks_like_video = mime.starts_with("video/") || RE_VIDEO_NAME.is_match(name);

    let (kind, fallback_ext) = if looks_like_gif {
        ("GIF (document)", ".gif")
    } else if looks_like_video {
        ("video (document)", ".mp4")
    } else {
        return Decision::Ineligible(Ineligible::UnsupportedDocument);
    };

    let input_ext = trailing_extension(name).unwrap_or_else(|| fallback_ext.to_string());
    Decision::Convert(ConversionPlan {
        strategy: Strategy::FrameExtract,
        kind,
        input_ext,
    })
}

/// Lowercased trailing `.ext` of a file name, if it has one.
#[must_use]
pub fn trailing_extension(name: &str) -> Option<String> {
    RE_TRAILING_EXT
        .find(name)
        .map(|m| m.as_str().to_ascii_lowercase())
}

fn plan(strategy: Strategy, kind: &'static str, input_ext: &str) -> Decision {
    Decision::Convert(ConversionPlan {
        strategy,
        kind,
        input_ext: input_ext.to_string(),
    })
}
