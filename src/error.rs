//! Error taxonomy for a single relay job.
//!
//! Every variant here is caught at the pipeline boundary and logged; none of
//! them reaches the platform's update acknowledgment path.

use std::time::Duration;
use thiserror::Error;

/// Failures while resolving or downloading an attachment.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The platform could not resolve the file handle to a download path.
    #[error("file resolution failed: {0}")]
    Resolve(String),
    /// The download endpoint answered with a non-success status.
    #[error("download failed: {status} {reason}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Canonical reason phrase, empty when unknown.
        reason: String,
    },
    /// Transport-level failure while downloading.
    #[error("download network error: {0}")]
    Network(String),
    /// The attachment exceeds the configured input size cap.
    #[error("attachment too large: {size} bytes (limit {limit})")]
    TooLarge {
        /// Declared or downloaded size in bytes.
        size: u64,
        /// Configured cap in bytes.
        limit: u64,
    },
    /// Writing the staged file failed.
    #[error("failed to stage download: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while turning staged media into a PNG still.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The raster container could not be decoded or re-encoded.
    #[error("image decode failed: {0}")]
    Decode(String),
    /// The external decoder exited unsuccessfully.
    #[error("decoder exited with {status}: {stderr}")]
    Decoder {
        /// Exit status description (code or signal).
        status: String,
        /// Diagnostic output captured from the decoder.
        stderr: String,
    },
    /// The external decoder could not be started.
    #[error("failed to start decoder: {0}")]
    Spawn(#[source] std::io::Error),
    /// The decoder succeeded but produced no usable frame.
    #[error("no decodable video frame: {0}")]
    MissingFrame(String),
    /// The produced frame is wider than the configured cap.
    #[error("extracted frame is {width}px wide, cap is {max}px")]
    Oversized {
        /// Width of the produced frame.
        width: u32,
        /// Configured maximum width.
        max: u32,
    },
    /// Filesystem error around the conversion.
    #[error("conversion io error: {0}")]
    Io(#[from] std::io::Error),
    /// The blocking conversion task panicked or was cancelled.
    #[error("conversion task failed: {0}")]
    Join(String),
}

/// Failures while forwarding the still to the destination.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The send call was rejected or did not complete.
    #[error("send to relay chat failed: {0}")]
    Send(String),
}

/// Terminal failure of one relay job.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No staging path could be allocated for the job.
    #[error("failed to allocate staging path: {0}")]
    Staging(#[source] std::io::Error),
    /// Fetch stage failure.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Conversion stage failure.
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    /// Dispatch stage failure.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// A stage exceeded the configured step timeout.
    #[error("{stage} timed out after {after:?}")]
    Timeout {
        /// Pipeline stage that timed out.
        stage: &'static str,
        /// Configured timeout.
        after: Duration,
    },
}

impl RelayError {
    /// Short stage label used in log fields.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Staging(_) => "staging",
            Self::Fetch(_) => "fetch",
            Self::Conversion(_) => "convert",
            Self::Dispatch(_) => "dispatch",
            Self::Timeout { stage, .. } => stage,
        }
    }
}
