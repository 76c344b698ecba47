//! Conversion engine: staged attachment in, single PNG still out.
//!
//! Raster containers are decoded in-process with the `image` crate. Video
//! and animation streams go through an external `ffmpeg`-compatible decoder
//! which keeps the first frame and scales it down to the width cap.

use crate::config::RoutingPolicy;
use crate::error::ConversionError;
use crate::media::classify::Strategy;
use crate::media::staging::publish_blocking;
use async_trait::async_trait;
use std::ffi::OsString;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Max characters of decoder diagnostics kept in an error.
const STDERR_EXCERPT_CHARS: usize = 8192;

/// Produces a PNG still from a staged input file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StillConverter: Send + Sync {
    /// Convert `input` into a PNG at `output` using `strategy`.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError`] if decoding fails or no frame is produced.
    async fn convert(
        &self,
        strategy: Strategy,
        input: &Path,
        output: &Path,
    ) -> Result<(), ConversionError>;
}

/// Default converter backed by the `image` crate and an external decoder.
#[derive(Debug, Clone)]
pub struct ConversionEngine {
    decoder: PathBuf,
    max_width: u32,
}

impl ConversionEngine {
    /// Engine using `decoder` for frame extraction and `max_width` as cap.
    #[must_use]
    pub fn new(decoder: impl Into<PathBuf>, max_width: u32) -> Self {
        Self {
            decoder: decoder.into(),
            max_width,
        }
    }

    /// Engine configured from the routing policy.
    #[must_use]
    pub fn from_policy(policy: &RoutingPolicy) -> Self {
        Self::new(policy.decoder.clone(), policy.max_frame_width)
    }

    /// Decoder arguments for a first-frame extraction.
    #[must_use]
    pub fn frame_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(input.as_os_str().to_owned());
        args.extend(["-frames:v", "1", "-vf"].iter().map(OsString::from));
        args.push(OsString::from(scale_filter(self.max_width)));
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Check that the decoder binary can be started.
    ///
    /// Returns `false` and logs a warning when it cannot; frame extraction
    /// jobs will fail until the decoder becomes available.
    pub async fn probe(&self) -> bool {
        match Command::new(&self.decoder)
            .arg("-version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(out) if out.status.success() => {
                let banner = String::from_utf8_lossy(&out.stdout);
                debug!(
                    decoder = %self.decoder.display(),
                    version = banner.lines().next().unwrap_or_default(),
                    "Decoder available"
                );
                true
            }
            Ok(out) => {
                warn!(decoder = %self.decoder.display(), status = %out.status, "Decoder probe failed");
                false
            }
            Err(e) => {
                warn!(decoder = %self.decoder.display(), error = %e, "Decoder not found");
                false
            }
        }
    }

    async fn reencode_raster(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let input = input.to_path_buf();
        let bytes = publish_blocking(output, move || -> Result<Vec<u8>, ConversionError> {
            let img = image::ImageReader::open(&input)?
                .with_guessed_format()?
                .decode()
                .map_err(|e| ConversionError::Decode(e.to_string()))?;
            let mut png = Cursor::new(Vec::new());
            img.write_to(&mut png, image::ImageFormat::Png)
                .map_err(|e| ConversionError::Decode(format!("png encode: {e}")))?;
            Ok(png.into_inner())
        })
        .await?;
        debug!(bytes, path = %output.display(), "Raster re-encoded");
        Ok(())
    }

    async fn extract_frame(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let result = Command::new(&self.decoder)
            .args(self.frame_args(input, output))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ConversionError::Spawn)?;

        if !result.status.success() {
            return Err(ConversionError::Decoder {
                status: result.status.to_string(),
                stderr: stderr_excerpt(&result.stderr),
            });
        }

        self.verify_frame(output).await
    }

    async fn verify_frame(&self, output: &Path) -> Result<(), ConversionError> {
        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => {
                return Err(ConversionError::MissingFrame(
                    "decoder wrote an empty file".to_string(),
                ))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConversionError::MissingFrame(
                    "decoder produced no output".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        }

        let path = output.to_path_buf();
        let (width, _height) = tokio::task::spawn_blocking(move || image::image_dimensions(&path))
            .await
            .map_err(|e| ConversionError::Join(e.to_string()))?
            .map_err(|e| ConversionError::MissingFrame(e.to_string()))?;

        check_frame_width(width, self.max_width)
    }
}

#[async_trait]
impl StillConverter for ConversionEngine {
    async fn convert(
        &self,
        strategy: Strategy,
        input: &Path,
        output: &Path,
    ) -> Result<(), ConversionError> {
        match strategy {
            Strategy::RasterReencode => self.reencode_raster(input, output).await,
            Strategy::FrameExtract => self.extract_frame(input, output).await,
        }
    }
}

/// Scale filter that caps width at `max_width` and never upscales.
///
/// The comma is escaped because the decoder treats bare commas as filter
/// separators.
#[must_use]
pub fn scale_filter(max_width: u32) -> String {
    format!("scale=iw*min(1\\,{max_width}/iw):-1")
}

/// Accept an extracted frame only if it fits within `max_width`.
///
/// # Errors
///
/// Returns [`ConversionError::Oversized`] when `width` exceeds the cap.
pub fn check_frame_width(width: u32, max_width: u32) -> Result<(), ConversionError> {
    if width > max_width {
        return Err(ConversionError::Oversized {
            width,
            max: max_width,
        });
    }
    Ok(())
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .trim()
        .chars()
        .take(STDERR_EXCERPT_CHARS)
        .collect()
}
